//! Master-branch read path (spec §4.2 "Read path (master)"): key-space
//! sharded live snapshots, merged under one write lock into a warm
//! in-memory cache that `get()` deep-copies from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use pixeltriage_core::metrics::ExpectationsCounters;
use pixeltriage_core::retry::{CircuitBreaker, RetryConfig};
use pixeltriage_core::{Cx, Expectations, Label, LockLevel, OrderedRwLock, TestName};

use crate::document_store::{ChangeKind, Collection, DocumentStore};
use crate::sharding::master_shard_filters;

pub const MASTER_CRS_CL_ID: &str = "master";

fn merge_batch(cache: &OrderedRwLock<Expectations>, changes: &[crate::document_store::SnapshotChange]) {
    if changes.is_empty() {
        return;
    }
    let mut guard = cache.write();
    for change in changes {
        match change.kind {
            ChangeKind::Added | ChangeKind::Modified => {
                if let Some(entry) = change.document.as_entry() {
                    guard.set(TestName::from(entry.grouping.as_str()), entry.digest.as_str().into(), entry.label);
                }
            }
            ChangeKind::Removed => {
                // Spec §9: expected absent in this workload; log only.
                tracing::debug!(id = change.id.as_str(), "master cache observed a removed entry, ignoring");
            }
        }
    }
}

/// Recover delay: `recoverTime + jitter` (spec §4.2), reusing the
/// backoff jitter machinery with a degenerate one-step schedule
/// (`base == max`, so `delay_for_attempt(0)` is exactly `recoverTime`
/// plus the usual ±25% jitter).
fn recover_delay(recover_time: Duration) -> Duration {
    let cfg = RetryConfig { max_retries: 0, base_delay: recover_time, max_delay: recover_time, max_total: recover_time };
    cfg.delay_for_attempt(0)
}

struct ShardWorker {
    store: Arc<dyn DocumentStore>,
    cache: Arc<OrderedRwLock<Expectations>>,
    stop: Arc<AtomicBool>,
    breaker: CircuitBreaker,
    recover_time: Duration,
    metrics: Arc<ExpectationsCounters>,
    filter: crate::document_store::QueryFilter,
}

impl ShardWorker {
    fn run(self) {
        let cx = Cx::new();
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            if !self.breaker.allow() {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            let mut snapshot = self.store.open_snapshot(Collection::Entries, self.filter.clone());
            loop {
                if self.stop.load(Ordering::Relaxed) {
                    return;
                }
                match snapshot.next_batch(&cx) {
                    Ok(batch) => {
                        self.breaker.record_success();
                        merge_batch(&self.cache, &batch.changes);
                        std::thread::sleep(Duration::from_millis(20));
                    }
                    Err(e) => {
                        self.breaker.record_failure();
                        self.metrics.snapshot_reconnects_total.inc();
                        tracing::warn!(error = %e, "master cache shard snapshot failed, reconnecting");
                        std::thread::sleep(recover_delay(self.recover_time));
                        break;
                    }
                }
            }
        }
    }
}

/// Owns the warm master-branch cache and its per-shard background
/// snapshot workers. Dropping the last handle stops the workers (best
/// effort: a worker mid-sleep notices `stop` on its next wakeup, the
/// usual coarse-polling shutdown idiom).
pub struct MasterCache {
    cache: Arc<OrderedRwLock<Expectations>>,
    stop: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MasterCache {
    /// Performs the initial full load for every shard synchronously (so
    /// the cache is warm before this returns), then spawns one background
    /// thread per shard to keep consuming incremental batches.
    #[must_use]
    pub fn start(
        doc_store: Arc<dyn DocumentStore>,
        num_shards: usize,
        recover_time: Duration,
        metrics: Arc<ExpectationsCounters>,
    ) -> Arc<Self> {
        let cache = Arc::new(OrderedRwLock::new(LockLevel::ExpectationsMasterCache, Expectations::new()));
        let filters = master_shard_filters(num_shards, MASTER_CRS_CL_ID);
        let cx = Cx::new();

        let mut initial_snapshots = Vec::with_capacity(filters.len());
        std::thread::scope(|scope| {
            let handles: Vec<_> = filters
                .iter()
                .map(|filter| {
                    let doc_store = Arc::clone(&doc_store);
                    let filter = filter.clone();
                    let cx = &cx;
                    scope.spawn(move || {
                        let mut snapshot = doc_store.open_snapshot(Collection::Entries, filter.clone());
                        let batch = snapshot.next_batch(cx);
                        (snapshot, filter, batch)
                    })
                })
                .collect();
            for handle in handles {
                if let Ok((snapshot, filter, batch)) = handle.join() {
                    if let Ok(batch) = batch {
                        merge_batch(&cache, &batch.changes);
                    }
                    initial_snapshots.push((snapshot, filter));
                }
            }
        });

        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(filters.len());
        for (idx, filter) in filters.into_iter().enumerate() {
            let worker = ShardWorker {
                store: Arc::clone(&doc_store),
                cache: Arc::clone(&cache),
                stop: Arc::clone(&stop),
                breaker: CircuitBreaker::with_params(5, recover_time),
                recover_time,
                metrics: Arc::clone(&metrics),
                filter,
            };
            if let Ok(handle) =
                std::thread::Builder::new().name(format!("expectations-shard-{idx}")).spawn(move || worker.run())
            {
                workers.push(handle);
            }
        }

        Arc::new(Self { cache, stop, workers: Mutex::new(workers) })
    }

    /// Deep copy of the cache, safe for the caller to mutate (spec §4.2
    /// `get()`).
    #[must_use]
    pub fn snapshot(&self) -> Expectations {
        self.cache.read().deep_copy()
    }

    pub fn classification(&self, test: &TestName, digest: &str) -> Label {
        self.cache.read().classification(test, &digest.into())
    }

    /// Optimistic write-path update (spec §5: "the cache is updated
    /// atomically under a write lock before the durable write starts").
    pub fn insert_local(&self, test: TestName, digest: pixeltriage_core::Digest, label: Label) {
        self.cache.write().set(test, digest, label);
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let mut workers = self.workers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for MasterCache {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store::{Document, EntryDoc};
    use crate::memory_store::MemoryDocumentStore;

    #[test]
    fn initial_load_populates_cache_before_start_returns() {
        let doc_store = MemoryDocumentStore::new();
        doc_store
            .set_batch(
                Collection::Entries,
                &[(
                    "e1".into(),
                    Document::Entry(EntryDoc {
                        grouping: "t1".into(),
                        digest: "aaa".into(),
                        label: Label::Positive,
                        updated: 1,
                        crs_cl_id: MASTER_CRS_CL_ID.into(),
                    }),
                )],
            )
            .unwrap();
        let metrics = Arc::new(ExpectationsCounters::new());
        let cache = MasterCache::start(Arc::new(doc_store), 4, Duration::from_millis(50), metrics);
        let snap = cache.snapshot();
        assert_eq!(snap.classification(&TestName::from("t1"), &"aaa".into()), Label::Positive);
        cache.shutdown();
    }

    #[test]
    fn background_worker_picks_up_later_writes() {
        let doc_store = MemoryDocumentStore::new();
        let metrics = Arc::new(ExpectationsCounters::new());
        let cache = MasterCache::start(Arc::new(doc_store.clone()), 2, Duration::from_millis(20), metrics);
        doc_store
            .set_batch(
                Collection::Entries,
                &[(
                    "e1".into(),
                    Document::Entry(EntryDoc {
                        grouping: "t1".into(),
                        digest: "bbb".into(),
                        label: Label::Negative,
                        updated: 1,
                        crs_cl_id: MASTER_CRS_CL_ID.into(),
                    }),
                )],
            )
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if cache.snapshot().classification(&TestName::from("t1"), &"bbb".into()) == Label::Negative {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "background worker never observed the write");
            std::thread::sleep(Duration::from_millis(10));
        }
        cache.shutdown();
    }
}
