//! Write algorithm (`addChange`), query-log, and undo (spec §4.2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use pixeltriage_core::metrics::ExpectationsCounters;
use pixeltriage_core::retry::RetryConfig;
use pixeltriage_core::{Cx, Delta, Label, LogTotal, TriageLogEntry};

use crate::document_store::{
    entry_doc_id, ChangeDoc, Collection, Document, DocumentStore, EntryDoc, PendingWrite, QueryFilter, RecordDoc,
};
use crate::error::{ExpectationsError, Result};

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn fresh_id(prefix: &str) -> String {
    let ts = Utc::now().timestamp_micros();
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{ts}-{n}")
}

/// One resolved `(test, digest) -> (before, after)` pair, computed against
/// the caller-supplied label lookup before any writes happen (spec §4.2
/// write algorithm step 1).
struct ResolvedEntry {
    grouping: String,
    digest: String,
    label_before: Label,
    label_after: Label,
}

/// Implements spec §4.2's `addChange` write algorithm, steps 1-6.
///
/// `current_label` resolves the pre-write label for a `(test, digest)`
/// pair: the master handle looks this up in its warm cache; an overlay
/// handle (uncached) reads the document store directly.
#[allow(clippy::too_many_arguments)]
pub fn add_change(
    doc_store: &Arc<dyn DocumentStore>,
    crs_cl_id: &str,
    delta: &Delta,
    user_id: &str,
    mut current_label: impl FnMut(&str, &str) -> Result<Label>,
    mut on_resolved: impl FnMut(&str, &str, Label),
    max_docs_per_transaction: usize,
    retry: &RetryConfig,
    metrics: &ExpectationsCounters,
    cx: &Cx,
) -> Result<pixeltriage_core::ExpectationChange> {
    metrics.add_change_total.inc();

    // Step 1: resolve every labelBefore against the pre-write view, then
    // immediately push the new value into the caller's cache (spec §5:
    // "the cache is updated atomically under a write lock before the
    // durable write starts"). A failure further down leaves the cache
    // briefly ahead of storage; the snapshot listener reconciles it.
    let mut resolved = Vec::new();
    for (test, digests) in delta {
        for (digest, label_after) in digests {
            let label_before = current_label(test.as_str(), digest.as_str())?;
            on_resolved(test.as_str(), digest.as_str(), *label_after);
            resolved.push(ResolvedEntry {
                grouping: test.as_str().to_string(),
                digest: digest.as_str().to_string(),
                label_before,
                label_after: *label_after,
            });
        }
    }

    // Step 2: create the record, committed=false.
    let record_id = fresh_id("rec");
    let ts = Utc::now().timestamp_micros();
    let change_ids: Vec<String> = resolved.iter().map(|_| fresh_id("chg")).collect();
    let record = RecordDoc {
        user: user_id.to_string(),
        ts,
        crs_cl_id: crs_cl_id.to_string(),
        change_ids: change_ids.clone(),
        committed: false,
        undo_of_id: None,
    };
    doc_store.set_batch(Collection::Records, &[(record_id.clone(), Document::Record(record.clone()))])?;

    // Step 3: split into batches so 2*batchSize + 1 <= maxDocsPerTransaction.
    let batch_size = ((max_docs_per_transaction.saturating_sub(1)) / 2).max(1);
    for (batch_idx, chunk) in resolved.chunks(batch_size).enumerate() {
        let chunk_ids = &change_ids[batch_idx * batch_size..batch_idx * batch_size + chunk.len()];
        let mut writes = Vec::with_capacity(chunk.len() * 2);
        for (entry, change_id) in chunk.iter().zip(chunk_ids) {
            let eid = entry_doc_id(crs_cl_id, &entry.grouping, &entry.digest);
            writes.push(PendingWrite {
                collection: Collection::Entries,
                id: eid,
                document: Document::Entry(EntryDoc {
                    grouping: entry.grouping.clone(),
                    digest: entry.digest.clone(),
                    label: entry.label_after,
                    updated: ts,
                    crs_cl_id: crs_cl_id.to_string(),
                }),
            });
            writes.push(PendingWrite {
                collection: Collection::Changes,
                id: change_id.clone(),
                document: Document::Change(ChangeDoc {
                    record_id: record_id.clone(),
                    grouping: entry.grouping.clone(),
                    digest: entry.digest.clone(),
                    label_before: entry.label_before,
                    label_after: entry.label_after,
                }),
            });
        }

        // Step 4: retry with exponential backoff, capped by max_total.
        let deadline = std::time::Instant::now() + retry.max_total;
        let mut attempt = 0u32;
        loop {
            if cx.check().is_err() {
                return Err(ExpectationsError::Cancelled);
            }
            match doc_store.commit_batch(&writes) {
                Ok(()) => break,
                Err(e) => {
                    if std::time::Instant::now() >= deadline || attempt >= retry.max_retries {
                        return Err(ExpectationsError::BackendTransient {
                            batch: format!("{}..{}", batch_idx * batch_size, batch_idx * batch_size + chunk.len()),
                            source: Box::new(e),
                        });
                    }
                    metrics.add_change_retries_total.inc();
                    std::thread::sleep(retry.delay_for_attempt(attempt));
                    attempt += 1;
                }
            }
        }
    }

    // Step 5: mark committed=true (final idempotent write).
    let mut committed_record = record;
    committed_record.committed = true;
    doc_store.set_batch(Collection::Records, &[(record_id.clone(), Document::Record(committed_record.clone()))])?;

    Ok(pixeltriage_core::ExpectationChange {
        id: record_id,
        user_id: user_id.to_string(),
        timestamp: ts,
        committed: true,
        count: resolved.len(),
        entries: resolved
            .into_iter()
            .map(|r| pixeltriage_core::ChangeEntry {
                test: r.grouping.into(),
                digest: r.digest.into(),
                label_before: r.label_before,
                label_after: r.label_after,
            })
            .collect(),
        undo_of_id: None,
        schema_version: 1,
    })
}

/// `queryLog(offset, size, withDetails)` (spec §4.2). Orders records
/// `ts desc`, slices by `offset`/`size`, and — only if `with_details` —
/// fetches each record's `changes` rows, sorted `(grouping asc, digest
/// asc)` for determinism.
pub fn query_log(
    doc_store: &Arc<dyn DocumentStore>,
    crs_cl_id: &str,
    offset: usize,
    size: usize,
    with_details: bool,
) -> Result<(Vec<TriageLogEntry>, LogTotal)> {
    let filter = QueryFilter {
        crs_cl_id: Some(crs_cl_id.to_string()),
        committed: Some(true),
        order_by_ts_desc: true,
        offset,
        limit: Some(size),
        digest_range: None,
    };
    let rows = doc_store.query(Collection::Records, &filter)?;

    let mut entries = Vec::with_capacity(rows.len());
    for (id, doc) in &rows {
        let Some(record) = doc.as_record() else { continue };
        let details = if with_details { Some(fetch_change_details(doc_store, id)?) } else { None };
        entries.push(TriageLogEntry {
            id: id.clone(),
            user_id: record.user.clone(),
            timestamp: record.ts,
            count: record.change_ids.len(),
            undo_of_id: record.undo_of_id.clone(),
            entries: details,
        });
    }

    let total = if entries.len() == size { LogTotal::CountMany } else { LogTotal::Exact(offset + entries.len()) };
    Ok((entries, total))
}

fn fetch_change_details(doc_store: &Arc<dyn DocumentStore>, record_id: &str) -> Result<Vec<pixeltriage_core::ChangeEntry>> {
    let all = doc_store.query(Collection::Changes, &QueryFilter::default())?;
    let mut details: Vec<pixeltriage_core::ChangeEntry> = all
        .into_iter()
        .filter_map(|(_, doc)| doc.as_change().cloned())
        .filter(|c| c.record_id == record_id)
        .map(|c| pixeltriage_core::ChangeEntry {
            test: c.grouping.into(),
            digest: c.digest.into(),
            label_before: c.label_before,
            label_after: c.label_after,
        })
        .collect();
    details.sort_by(|a, b| a.test.cmp(&b.test).then_with(|| a.digest.cmp(&b.digest)));
    Ok(details)
}

/// `undoChange(id, userId)` (spec §4.2): loads the referenced record
/// (fails if absent), reconstructs `(grouping, digest) -> labelBefore` from
/// its `changes` rows, and applies that as a brand-new `addChange` (itself
/// undoable).
#[allow(clippy::too_many_arguments)]
pub fn undo_change(
    doc_store: &Arc<dyn DocumentStore>,
    crs_cl_id: &str,
    change_id: &str,
    user_id: &str,
    current_label: impl FnMut(&str, &str) -> Result<Label>,
    on_resolved: impl FnMut(&str, &str, Label),
    max_docs_per_transaction: usize,
    retry: &RetryConfig,
    metrics: &ExpectationsCounters,
    cx: &Cx,
) -> Result<pixeltriage_core::ExpectationChange> {
    metrics.undo_total.inc();

    let Some(record_doc) = doc_store.get(Collection::Records, change_id)? else {
        return Err(ExpectationsError::NotFound(change_id.to_string()));
    };
    let Some(record) = record_doc.as_record() else {
        return Err(ExpectationsError::Corruption(change_id.to_string()));
    };

    let all_changes = doc_store.query(Collection::Changes, &QueryFilter::default())?;
    let mut delta = Delta::new();
    for (_, doc) in all_changes {
        let Some(change) = doc.as_change() else { continue };
        if change.record_id != change_id {
            continue;
        }
        delta
            .entry(change.grouping.clone().into())
            .or_default()
            .insert(change.digest.clone().into(), change.label_before);
    }

    let _ = &record.crs_cl_id;
    let mut result = add_change(
        doc_store,
        crs_cl_id,
        &delta,
        user_id,
        current_label,
        on_resolved,
        max_docs_per_transaction,
        retry,
        metrics,
        cx,
    )?;
    result.undo_of_id = Some(change_id.to_string());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryDocumentStore;
    use pixeltriage_core::{test_harness::one_delta, Digest, Expectations, TestName};
    use std::sync::Mutex;

    fn store() -> Arc<dyn DocumentStore> {
        Arc::new(MemoryDocumentStore::new())
    }

    fn label_lookup(cache: &Mutex<Expectations>) -> impl FnMut(&str, &str) -> Result<Label> + '_ {
        move |test: &str, digest: &str| -> Result<Label> {
            Ok(cache.lock().unwrap().classification(&TestName::from(test), &Digest::from(digest)))
        }
    }

    fn on_resolved(cache: &Mutex<Expectations>) -> impl FnMut(&str, &str, Label) + '_ {
        move |test: &str, digest: &str, label: Label| {
            cache.lock().unwrap().set(TestName::from(test), Digest::from(digest), label);
        }
    }

    #[test]
    fn add_change_then_query_log_shows_committed_record() {
        let doc_store = store();
        let cache = Mutex::new(Expectations::new());
        let metrics = ExpectationsCounters::new();
        let retry = RetryConfig::default();
        let cx = Cx::new();
        let delta = one_delta("t1", "d1", Label::Positive);

        let record = add_change(
            &doc_store,
            "master",
            &delta,
            "user-a",
            label_lookup(&cache),
            on_resolved(&cache),
            500,
            &retry,
            &metrics,
            &cx,
        )
        .unwrap();
        assert_eq!(record.entries.len(), 1);
        assert_eq!(record.entries[0].label_before, Label::Untriaged);
        assert_eq!(record.entries[0].label_after, Label::Positive);

        let (entries, total) = query_log(&doc_store, "master", 0, 10, true).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(total, LogTotal::Exact(1)));
        assert_eq!(entries[0].entries.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn undo_change_restores_prior_label() {
        let doc_store = store();
        let cache = Mutex::new(Expectations::new());
        let metrics = ExpectationsCounters::new();
        let retry = RetryConfig::default();
        let cx = Cx::new();

        let delta1 = one_delta("t1", "d1", Label::Negative);
        let r1 = add_change(
            &doc_store,
            "master",
            &delta1,
            "u",
            label_lookup(&cache),
            on_resolved(&cache),
            500,
            &retry,
            &metrics,
            &cx,
        )
        .unwrap();

        let delta2 = one_delta("t1", "d1", Label::Positive);
        add_change(&doc_store, "master", &delta2, "u", label_lookup(&cache), on_resolved(&cache), 500, &retry, &metrics, &cx)
            .unwrap();

        let undone = undo_change(
            &doc_store,
            "master",
            &r1.id,
            "u",
            label_lookup(&cache),
            on_resolved(&cache),
            500,
            &retry,
            &metrics,
            &cx,
        )
        .unwrap();
        assert_eq!(undone.entries[0].label_after, Label::Negative);
        assert_eq!(undone.undo_of_id.as_deref(), Some(r1.id.as_str()));
    }

    #[test]
    fn undo_of_missing_change_is_not_found() {
        let doc_store = store();
        let cache = Mutex::new(Expectations::new());
        let metrics = ExpectationsCounters::new();
        let retry = RetryConfig::default();
        let cx = Cx::new();
        let err = undo_change(
            &doc_store,
            "master",
            "nonexistent",
            "u",
            label_lookup(&cache),
            on_resolved(&cache),
            500,
            &retry,
            &metrics,
            &cx,
        )
        .unwrap_err();
        assert!(matches!(err, ExpectationsError::NotFound(_)));
    }
}
