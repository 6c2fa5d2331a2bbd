//! The `DocumentStore` contract consumed by the ExpectationsStore (spec
//! §4.2 "Storage schema", §6 "Document store (consumed)"): three logical
//! collections (entries, records, changes), single `get`, batched
//! `set`/`commit`, `query` with where/orderBy/offset/limit, and a
//! restartable live-snapshot stream of change batches.
//!
//! Backend-agnostic by design — the reference implementation
//! ([`crate::memory_store::MemoryDocumentStore`]) is in-memory, but a
//! production deployment would swap in a Firestore/Datastore-backed one
//! without this crate's store logic changing.

use pixeltriage_core::{Cx, Label};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Entries,
    Records,
    Changes,
}

/// `{grouping, digest, label, updated, crsClId}` (spec §4.2 schema item 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDoc {
    pub grouping: String,
    pub digest: String,
    pub label: Label,
    pub updated: i64,
    pub crs_cl_id: String,
}

/// `{user, ts, crsClId, changes, committed}` (spec §4.2 schema item 2).
/// `undo_of_id` is an ambient extension (SPEC_FULL §3) recording that this
/// record was produced by an `undoChange` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDoc {
    pub user: String,
    pub ts: i64,
    pub crs_cl_id: String,
    pub change_ids: Vec<String>,
    pub committed: bool,
    pub undo_of_id: Option<String>,
}

/// `{recordId, grouping, digest, labelBefore, labelAfter}` (spec §4.2
/// schema item 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDoc {
    pub record_id: String,
    pub grouping: String,
    pub digest: String,
    pub label_before: Label,
    pub label_after: Label,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Document {
    Entry(EntryDoc),
    Record(RecordDoc),
    Change(ChangeDoc),
}

impl Document {
    #[must_use]
    pub fn as_entry(&self) -> Option<&EntryDoc> {
        match self {
            Self::Entry(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&RecordDoc> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_change(&self) -> Option<&ChangeDoc> {
        match self {
            Self::Change(c) => Some(c),
            _ => None,
        }
    }
}

/// Entries-collection document id: deterministic so re-triage of the same
/// `(crsClId, grouping, digest)` upserts (spec §4.2 "Entries use
/// deterministic ids"). The spec names the id `grouping|digest`; `crsClId`
/// is folded in so the master branch and per-CL overlays (which share
/// this collection, distinguished only by the `crsClId` field) never
/// collide on the same document.
#[must_use]
pub fn entry_doc_id(crs_cl_id: &str, grouping: &str, digest: &str) -> String {
    format!("{crs_cl_id}_{}", format!("{grouping}|{digest}").replace('/', "-"))
}

/// `where`/`orderBy`/`offset`/`limit` (spec §6 "Document store (consumed)").
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub crs_cl_id: Option<String>,
    /// Half-open `[start, end)` range over the numeric value of the
    /// digest's leading 8 hex characters, used by the master cache's
    /// key-space sharding (spec §4.2 "Read path (master)"). `end = None`
    /// means unbounded (the last shard).
    pub digest_range: Option<(u32, Option<u32>)>,
    /// Restrict `Collection::Records` rows to a given `committed` value.
    /// Applied before `offset`/`limit` slicing so pagination runs over the
    /// already-filtered row set (spec.md:118 "Query-log consumers filter
    /// on `committed=true`").
    pub committed: Option<bool>,
    pub order_by_ts_desc: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl QueryFilter {
    #[must_use]
    pub fn for_crs_cl_id(crs_cl_id: impl Into<String>) -> Self {
        Self { crs_cl_id: Some(crs_cl_id.into()), ..Self::default() }
    }
}

/// One write inside a transactional batch (spec §4.2 write algorithm step
/// 3, §6 "transactional batch of up to 500 writes").
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub collection: Collection,
    pub id: String,
    pub document: Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone)]
pub struct SnapshotChange {
    pub kind: ChangeKind,
    pub id: String,
    pub document: Document,
}

/// One batch delivered by a [`LiveSnapshot`] (spec §9 "restartable
/// iterator of batches of `{kind, document}`").
#[derive(Debug, Clone, Default)]
pub struct SnapshotBatch {
    pub changes: Vec<SnapshotChange>,
}

/// A restartable stream of change batches (spec §4.2 "Read path
/// (master)": "The first `next()` on each shard returns all data and
/// populates the cache; subsequent `next()` calls deliver change
/// batches").
pub trait LiveSnapshot: Send {
    fn next_batch(&mut self, cx: &Cx) -> Result<SnapshotBatch>;
}

/// Backend-agnostic document store (spec §6).
pub trait DocumentStore: Send + Sync {
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>>;

    /// Upserts every `(id, document)` pair non-transactionally (spec §4.2
    /// step 2's bare record creation uses this; batched entries+changes
    /// writes use [`DocumentStore::commit_batch`] instead).
    fn set_batch(&self, collection: Collection, docs: &[(String, Document)]) -> Result<()>;

    /// Atomically applies every write in `batch` or none of them (spec
    /// §4.2 step 3 "Each batch writes the entries and their change rows
    /// atomically").
    fn commit_batch(&self, batch: &[PendingWrite]) -> Result<()>;

    fn query(&self, collection: Collection, filter: &QueryFilter) -> Result<Vec<(String, Document)>>;

    fn open_snapshot(&self, collection: Collection, filter: QueryFilter) -> Box<dyn LiveSnapshot>;

    /// Administrative: removes all data (spec §4.2 `clear()`).
    fn clear_all(&self) -> Result<()>;
}
