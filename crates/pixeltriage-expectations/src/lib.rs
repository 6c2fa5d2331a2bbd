//! Durable Tests→Digest→Label store (spec §4.2): a single master branch
//! backed by a warm, sharded in-memory cache, any number of per-changelist
//! overlays, an append-only audit log with undo, and live change
//! notifications over [`pixeltriage_eventbus`].

#![forbid(unsafe_code)]

pub mod audit;
pub mod document_store;
pub mod error;
pub mod evidence;
pub mod master_cache;
pub mod memory_store;
pub mod overlay;
pub mod sharding;
pub mod store;

pub use document_store::{
    entry_doc_id, ChangeDoc, ChangeKind, Collection, Document, DocumentStore, EntryDoc, LiveSnapshot, PendingWrite,
    QueryFilter, RecordDoc, SnapshotBatch, SnapshotChange,
};
pub use error::{ExpectationsError, Result};
pub use master_cache::{MasterCache, MASTER_CRS_CL_ID};
pub use memory_store::MemoryDocumentStore;
pub use store::ExpectationsStore;
