//! In-memory reference [`DocumentStore`] implementation. Stands in for a
//! Firestore/Datastore-backed store (spec §6); used by the server binary's
//! default configuration and by every test in this crate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pixeltriage_core::Cx;

use crate::document_store::{
    ChangeKind, Collection, Document, DocumentStore, LiveSnapshot, PendingWrite, QueryFilter, SnapshotBatch,
    SnapshotChange,
};
use crate::error::{ExpectationsError, Result};
use crate::sharding::in_range;

struct LogEntry {
    seq: u64,
    collection: Collection,
    kind: ChangeKind,
    id: String,
    document: Document,
}

#[derive(Default)]
struct StoreState {
    entries: BTreeMap<String, Document>,
    records: BTreeMap<String, Document>,
    changes: BTreeMap<String, Document>,
    log: Vec<LogEntry>,
}

impl StoreState {
    fn map(&self, collection: Collection) -> &BTreeMap<String, Document> {
        match collection {
            Collection::Entries => &self.entries,
            Collection::Records => &self.records,
            Collection::Changes => &self.changes,
        }
    }

    fn map_mut(&mut self, collection: Collection) -> &mut BTreeMap<String, Document> {
        match collection {
            Collection::Entries => &mut self.entries,
            Collection::Records => &mut self.records,
            Collection::Changes => &mut self.changes,
        }
    }
}

struct Shared {
    state: Mutex<StoreState>,
    next_seq: AtomicU64,
    fail_commits_remaining: AtomicUsize,
    fail_snapshot_next_remaining: AtomicUsize,
}

/// Cheap to clone (internally `Arc`-backed) so live-snapshot cursors can
/// outlive the `&self` borrow of [`DocumentStore::open_snapshot`].
#[derive(Clone)]
pub struct MemoryDocumentStore(Arc<Shared>);

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Shared {
            state: Mutex::new(StoreState::default()),
            next_seq: AtomicU64::new(1),
            fail_commits_remaining: AtomicUsize::new(0),
            fail_snapshot_next_remaining: AtomicUsize::new(0),
        }))
    }

    /// Test hook: makes the next `n` calls to `commit_batch` fail with a
    /// transient error, exercising the write path's retry-with-backoff.
    pub fn inject_commit_failures(&self, n: usize) {
        self.0.fail_commits_remaining.store(n, Ordering::Relaxed);
    }

    /// Test hook: makes the next `n` calls to a live snapshot's
    /// `next_batch` fail, exercising the master cache's reconnect logic.
    pub fn inject_snapshot_failures(&self, n: usize) {
        self.0.fail_snapshot_next_remaining.store(n, Ordering::Relaxed);
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn document_matches(collection: Collection, doc: &Document, filter: &QueryFilter) -> bool {
    match (collection, doc) {
        (Collection::Entries, Document::Entry(e)) => {
            filter.crs_cl_id.as_deref().is_none_or(|c| c == e.crs_cl_id)
                && filter.digest_range.is_none_or(|r| in_range(&e.digest, r))
        }
        (Collection::Records, Document::Record(r)) => {
            filter.crs_cl_id.as_deref().is_none_or(|c| c == r.crs_cl_id)
                && filter.committed.is_none_or(|c| c == r.committed)
        }
        (Collection::Changes, Document::Change(_)) => true,
        _ => false,
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        let state = self.0.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(state.map(collection).get(id).cloned())
    }

    fn set_batch(&self, collection: Collection, docs: &[(String, Document)]) -> Result<()> {
        let mut state = self.0.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (id, document) in docs {
            let kind = if state.map(collection).contains_key(id) { ChangeKind::Modified } else { ChangeKind::Added };
            state.map_mut(collection).insert(id.clone(), document.clone());
            let seq = self.0.next_seq.fetch_add(1, Ordering::Relaxed);
            state.log.push(LogEntry { seq, collection, kind, id: id.clone(), document: document.clone() });
        }
        Ok(())
    }

    fn commit_batch(&self, batch: &[PendingWrite]) -> Result<()> {
        if self.0.fail_commits_remaining.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            if n > 0 {
                Some(n - 1)
            } else {
                None
            }
        }).is_ok()
        {
            return Err(ExpectationsError::Io(std::io::Error::other("injected transient commit failure")));
        }

        let mut state = self.0.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for write in batch {
            let kind =
                if state.map(write.collection).contains_key(&write.id) { ChangeKind::Modified } else { ChangeKind::Added };
            state.map_mut(write.collection).insert(write.id.clone(), write.document.clone());
            let seq = self.0.next_seq.fetch_add(1, Ordering::Relaxed);
            state.log.push(LogEntry {
                seq,
                collection: write.collection,
                kind,
                id: write.id.clone(),
                document: write.document.clone(),
            });
        }
        Ok(())
    }

    fn query(&self, collection: Collection, filter: &QueryFilter) -> Result<Vec<(String, Document)>> {
        let state = self.0.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut rows: Vec<(String, Document)> = state
            .map(collection)
            .iter()
            .filter(|(_, doc)| document_matches(collection, doc, filter))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect();

        if filter.order_by_ts_desc {
            rows.sort_by(|a, b| {
                let ta = a.1.as_record().map_or(0, |r| r.ts);
                let tb = b.1.as_record().map_or(0, |r| r.ts);
                tb.cmp(&ta).then_with(|| a.0.cmp(&b.0))
            });
        } else {
            rows.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let rows = rows.into_iter().skip(filter.offset);
        Ok(match filter.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        })
    }

    fn open_snapshot(&self, collection: Collection, filter: QueryFilter) -> Box<dyn LiveSnapshot> {
        Box::new(MemorySnapshot { shared: Arc::clone(&self.0), collection, filter, cursor_seq: 0, initialized: false })
    }

    fn clear_all(&self) -> Result<()> {
        let mut state = self.0.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *state = StoreState::default();
        Ok(())
    }
}

struct MemorySnapshot {
    shared: Arc<Shared>,
    collection: Collection,
    filter: QueryFilter,
    cursor_seq: u64,
    initialized: bool,
}

impl LiveSnapshot for MemorySnapshot {
    fn next_batch(&mut self, cx: &Cx) -> Result<SnapshotBatch> {
        if cx.check().is_err() {
            return Err(ExpectationsError::Cancelled);
        }
        if self
            .shared
            .fail_snapshot_next_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| if n > 0 { Some(n - 1) } else { None })
            .is_ok()
        {
            return Err(ExpectationsError::Io(std::io::Error::other("injected transient snapshot failure")));
        }

        let state = self.shared.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if !self.initialized {
            self.initialized = true;
            let changes = state
                .map(self.collection)
                .iter()
                .filter(|(_, doc)| document_matches(self.collection, doc, &self.filter))
                .map(|(id, doc)| SnapshotChange { kind: ChangeKind::Added, id: id.clone(), document: doc.clone() })
                .collect();
            self.cursor_seq = state.log.last().map_or(0, |e| e.seq);
            return Ok(SnapshotBatch { changes });
        }

        let mut changes = Vec::new();
        let mut max_seq = self.cursor_seq;
        for entry in &state.log {
            if entry.seq <= self.cursor_seq || entry.collection != self.collection {
                continue;
            }
            if document_matches(self.collection, &entry.document, &self.filter) {
                changes.push(SnapshotChange { kind: entry.kind, id: entry.id.clone(), document: entry.document.clone() });
            }
            max_seq = max_seq.max(entry.seq);
        }
        self.cursor_seq = max_seq;
        Ok(SnapshotBatch { changes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store::EntryDoc;
    use pixeltriage_core::Label;

    fn entry(crs_cl_id: &str, digest: &str, label: Label) -> Document {
        Document::Entry(EntryDoc {
            grouping: "t1".into(),
            digest: digest.into(),
            label,
            updated: 1,
            crs_cl_id: crs_cl_id.into(),
        })
    }

    #[test]
    fn set_then_get_roundtrips() {
        let store = MemoryDocumentStore::new();
        store.set_batch(Collection::Entries, &[("e1".into(), entry("master", "aaa", Label::Positive))]).unwrap();
        let got = store.get(Collection::Entries, "e1").unwrap().unwrap();
        assert_eq!(got.as_entry().unwrap().digest, "aaa");
    }

    #[test]
    fn commit_batch_injected_failure_then_recovers() {
        let store = MemoryDocumentStore::new();
        store.inject_commit_failures(2);
        let write = PendingWrite { collection: Collection::Entries, id: "e1".into(), document: entry("master", "aaa", Label::Positive) };
        assert!(store.commit_batch(std::slice::from_ref(&write)).is_err());
        assert!(store.commit_batch(std::slice::from_ref(&write)).is_err());
        assert!(store.commit_batch(std::slice::from_ref(&write)).is_ok());
        assert!(store.get(Collection::Entries, "e1").unwrap().is_some());
    }

    #[test]
    fn snapshot_first_batch_is_full_scan_then_incremental() {
        let store = MemoryDocumentStore::new();
        store.set_batch(Collection::Entries, &[("e1".into(), entry("master", "aaa", Label::Positive))]).unwrap();
        let mut snap = store.open_snapshot(Collection::Entries, QueryFilter::for_crs_cl_id("master"));
        let cx = Cx::new();
        let first = snap.next_batch(&cx).unwrap();
        assert_eq!(first.changes.len(), 1);
        assert_eq!(first.changes[0].kind, ChangeKind::Added);

        let second = snap.next_batch(&cx).unwrap();
        assert!(second.changes.is_empty());

        store.set_batch(Collection::Entries, &[("e2".into(), entry("master", "bbb", Label::Negative))]).unwrap();
        let third = snap.next_batch(&cx).unwrap();
        assert_eq!(third.changes.len(), 1);
        assert_eq!(third.changes[0].id, "e2");
    }

    #[test]
    fn query_filters_by_crs_cl_id_and_digest_range() {
        let store = MemoryDocumentStore::new();
        store
            .set_batch(
                Collection::Entries,
                &[
                    ("e1".into(), entry("master", "00000000aaaa", Label::Positive)),
                    ("e2".into(), entry("master", "ffffffffaaaa", Label::Negative)),
                    ("e3".into(), entry("123_4", "00000000aaaa", Label::Positive)),
                ],
            )
            .unwrap();
        let filter = QueryFilter { crs_cl_id: Some("master".into()), digest_range: Some((0, Some(0x8000_0000))), ..QueryFilter::default() };
        let rows = store.query(Collection::Entries, &filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "e1");
    }
}
