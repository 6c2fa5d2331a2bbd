//! Per-changelist read path (spec §4.2 "Read path (per-CL overlay)"):
//! uncached, queried fresh on every `get()` since overlays are small and
//! short-lived compared to the master branch.

use std::sync::Arc;

use pixeltriage_core::{Digest, Expectations, Label, TestName};

use crate::document_store::{Collection, DocumentStore, QueryFilter};
use crate::error::Result;
use crate::sharding::shard_ranges;

/// Fetches every entry for `crs_cl_id`, sharded into `num_shards` parallel
/// queries (spec: "fetched in parallel across a small number of shards,
/// typically 4") and merged into one table.
pub fn load_overlay(doc_store: &Arc<dyn DocumentStore>, crs_cl_id: &str, num_shards: usize) -> Result<Expectations> {
    let ranges = shard_ranges(num_shards);
    let results: Vec<Result<Vec<(String, crate::document_store::Document)>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = ranges
            .into_iter()
            .map(|range| {
                let doc_store = Arc::clone(doc_store);
                let crs_cl_id = crs_cl_id.to_string();
                scope.spawn(move || {
                    let filter =
                        QueryFilter { crs_cl_id: Some(crs_cl_id), digest_range: Some(range), ..QueryFilter::default() };
                    doc_store.query(Collection::Entries, &filter)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap_or_else(|_| Ok(Vec::new()))).collect()
    });

    let mut out = Expectations::new();
    for shard_result in results {
        for (_, doc) in shard_result? {
            if let Some(entry) = doc.as_entry() {
                out.set(TestName::from(entry.grouping.as_str()), Digest::from(entry.digest.as_str()), entry.label);
            }
        }
    }
    Ok(out)
}

#[must_use]
pub fn classification_from(expectations: &Expectations, test: &TestName, digest: &Digest) -> Label {
    expectations.classification(test, digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store::{Document, EntryDoc};
    use crate::memory_store::MemoryDocumentStore;

    #[test]
    fn loads_only_the_requested_cl() {
        let doc_store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        doc_store
            .set_batch(
                Collection::Entries,
                &[
                    (
                        "e1".into(),
                        Document::Entry(EntryDoc {
                            grouping: "t1".into(),
                            digest: "aaa".into(),
                            label: Label::Positive,
                            updated: 1,
                            crs_cl_id: "gerrit_123".into(),
                        }),
                    ),
                    (
                        "e2".into(),
                        Document::Entry(EntryDoc {
                            grouping: "t1".into(),
                            digest: "bbb".into(),
                            label: Label::Negative,
                            updated: 1,
                            crs_cl_id: "master".into(),
                        }),
                    ),
                ],
            )
            .unwrap();

        let overlay = load_overlay(&doc_store, "gerrit_123", 4).unwrap();
        assert_eq!(overlay.classification(&TestName::from("t1"), &Digest::from("aaa")), Label::Positive);
        assert_eq!(overlay.classification(&TestName::from("t1"), &Digest::from("bbb")), Label::Untriaged);
    }

    #[test]
    fn empty_cl_yields_empty_overlay() {
        let doc_store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let overlay = load_overlay(&doc_store, "gerrit_999", 4).unwrap();
        assert!(overlay.is_empty());
    }
}
