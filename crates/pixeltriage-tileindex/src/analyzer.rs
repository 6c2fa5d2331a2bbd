//! The Analyzer (spec §4.1 "Loop"): a background poll thread that keeps
//! a `TileIndex` current and exposes the derived query/status/blame
//! views, plus a relabel path driven by expectation-change events (spec
//! §9 "Cyclic reference between Analyzer and ExpectationsStore").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use pixeltriage_core::metrics::TileAnalyzerCounters;
use pixeltriage_core::{BlameDistribution, CorpusStatus, Delta, Label, LockLevel, OrderedRwLock, Summary, TestName};
use pixeltriage_eventbus::{EventBus, Topic};
use pixeltriage_expectations::{ExpectationsStore, Result as ExpectationsResult};

use crate::blame::blame_for_test;
use crate::index::{build_tile_index, relabel_test, TileIndex};
use crate::query::{get_test_details, list_test_details, EffectiveQuery, Query};
use crate::status::get_status;
use crate::trace_store::TraceStore;

/// Owns the current [`TileIndex`] behind an atomic swap point and drives
/// the background poll loop (spec §4.1 "Loop" steps 1-7).
pub struct Analyzer {
    index: Arc<OrderedRwLock<Arc<TileIndex>>>,
    store: Arc<ExpectationsStore>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<TileAnalyzerCounters>,
}

impl Analyzer {
    /// Starts the background poll loop on a dedicated OS thread (teacher
    /// precedent: `coalescer_pool_worker`/`wbq_drain_loop`'s
    /// condvar-free coarse-sleep idiom), subscribing to expectation
    /// changes so relabeling can be triggered without the Analyzer
    /// holding a direct reference back to the store's event source.
    #[must_use]
    pub fn start(
        trace_store: Arc<dyn TraceStore>,
        store: Arc<ExpectationsStore>,
        event_bus: Option<Arc<EventBus>>,
        poll_interval: Duration,
        metrics: Arc<TileAnalyzerCounters>,
    ) -> Arc<Self> {
        let index = Arc::new(OrderedRwLock::new(LockLevel::TileIndexSwap, Arc::new(TileIndex::default())));
        let stop = Arc::new(AtomicBool::new(false));

        let analyzer = Arc::new(Self { index, store, stop, worker: Mutex::new(None), metrics });

        tick(&analyzer.index, &trace_store, &analyzer.store, &analyzer.metrics);

        if let Some(bus) = &event_bus {
            let analyzer_for_events = Arc::clone(&analyzer);
            bus.subscribe_async(Topic::ExpectationsChanged, move |payload| {
                let delta = payload.to_delta();
                analyzer_for_events.relabel_from_delta(&delta);
            });
        }

        let analyzer_for_loop = Arc::clone(&analyzer);
        let handle = std::thread::Builder::new()
            .name("tile-analyzer-poll".into())
            .spawn(move || poll_loop(analyzer_for_loop, trace_store, poll_interval))
            .ok();
        *analyzer.worker.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = handle;

        analyzer
    }

    /// `listTestDetails(query)` (spec §4.1).
    #[must_use]
    pub fn list_test_details(&self, query: &Query) -> (Vec<Summary>, EffectiveQuery) {
        list_test_details(&self.current(), query)
    }

    /// `getTestDetails(testName, query)` (spec §4.1).
    #[must_use]
    pub fn get_test_details(&self, test: &TestName, query: &Query) -> (Summary, EffectiveQuery) {
        get_test_details(&self.current(), test, query)
    }

    /// `getStatus()` (spec §4.1).
    #[must_use]
    pub fn get_status(&self) -> Vec<CorpusStatus> {
        get_status(&self.current())
    }

    #[must_use]
    pub fn blame_for_test(&self, test: &TestName) -> Vec<BlameDistribution> {
        blame_for_test(&self.current(), test)
    }

    /// Every digest observed in the current tile, grouped by test — the
    /// input `Warmer::warm` needs to know which digests are worth caching
    /// (spec's data-flow note "Analyzer (status, blame) -> Warmer ->
    /// DiffStore").
    #[must_use]
    pub fn observed_digests_by_test(&self) -> std::collections::HashMap<TestName, Vec<pixeltriage_core::Digest>> {
        let index = self.current();
        let mut out: std::collections::HashMap<TestName, Vec<pixeltriage_core::Digest>> = std::collections::HashMap::new();
        for (trace_id, labeled) in &index.labeled {
            let Some(test) = index.trace_test.get(trace_id) else { continue };
            out.entry(test.clone()).or_default().extend(labeled.digests.iter().cloned());
        }
        out
    }

    /// The current expectations snapshot, for callers (the Warmer) that
    /// need to distinguish negative/untriaged digests while warming.
    #[must_use]
    pub fn expectations(&self) -> pixeltriage_core::Expectations {
        self.store.get()
    }

    /// `setDigestLabels(changes, userId)` (spec §4.1): persists via the
    /// store, then triggers a targeted relabel for every affected test
    /// without waiting for the next poll tick.
    pub fn set_digest_labels(&self, changes: &Delta, user_id: &str) -> ExpectationsResult<()> {
        self.store.add_change(changes, user_id)?;
        self.relabel_from_delta(changes);
        Ok(())
    }

    fn current(&self) -> Arc<TileIndex> {
        Arc::clone(&self.index.read())
    }

    fn relabel_from_delta(&self, delta: &Delta) {
        for test in delta.keys() {
            self.relabel_test(test);
        }
    }

    fn relabel_test(&self, test: &TestName) {
        let current = self.current();
        let expectations = self.store.get();
        let next = relabel_test(&current, test, |digest| expectations.classification(test, digest));
        *self.index.write() = Arc::new(next);
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Analyzer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn tick(
    index_slot: &Arc<OrderedRwLock<Arc<TileIndex>>>,
    trace_store: &Arc<dyn TraceStore>,
    store: &Arc<ExpectationsStore>,
    metrics: &Arc<TileAnalyzerCounters>,
) {
    let tick_seq = metrics.poll_total.load();
    let span = tracing::info_span!("tile_analyzer.poll", tick_seq);
    let _enter = span.enter();
    let started = Instant::now();

    let tile = trace_store.get(0, 0);
    let expectations = store.get();
    let next = build_tile_index(&tile, |test, digest| expectations.classification(test, digest));
    let trace_count = next.labeled.len();

    *index_slot.write() = Arc::new(next);

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    metrics.poll_total.inc();
    metrics.poll_last_trace_count.add(u64::try_from(trace_count).unwrap_or(u64::MAX));
    metrics.poll_last_duration_ms.add(duration_ms);
    tracing::debug!(trace_count, duration_ms, "tile analyzer tick complete");
}

fn poll_loop(analyzer: Arc<Analyzer>, trace_store: Arc<dyn TraceStore>, poll_interval: Duration) {
    loop {
        std::thread::sleep(poll_interval);
        if analyzer.stop.load(Ordering::Relaxed) {
            return;
        }
        tick(&analyzer.index, &trace_store, &analyzer.store, &analyzer.metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_store::{InMemoryTraceStore, Tile};
    use pixeltriage_core::test_harness::sample_tile;
    use pixeltriage_core::Config;
    use pixeltriage_expectations::MemoryDocumentStore;
    use std::sync::Arc;

    fn make_tile() -> Tile {
        let (commits, traces) = sample_tile();
        Tile { commits, traces: traces.into_iter().map(|(t, tr)| (t.0, tr)).collect() }
    }

    fn make_store() -> Arc<ExpectationsStore> {
        let doc_store: Arc<dyn pixeltriage_expectations::DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let config = Config::default();
        Arc::new(ExpectationsStore::open_master(
            doc_store,
            &config,
            None,
            Arc::new(pixeltriage_core::metrics::ExpectationsCounters::new()),
        ))
    }

    #[test]
    fn initial_tick_populates_index_before_the_poll_loop_runs() {
        let trace_store: Arc<dyn TraceStore> = Arc::new(InMemoryTraceStore::new(make_tile()));
        let store = make_store();
        let analyzer = Analyzer::start(
            trace_store,
            store,
            None,
            Duration::from_secs(3600),
            Arc::new(TileAnalyzerCounters::new()),
        );
        let (summaries, _) = analyzer.list_test_details(&Query::default());
        assert_eq!(summaries.len(), 5);
        analyzer.shutdown();
    }

    #[test]
    fn set_digest_labels_relabels_without_waiting_for_a_tick() {
        let trace_store: Arc<dyn TraceStore> = Arc::new(InMemoryTraceStore::new(make_tile()));
        let store = make_store();
        let analyzer = Analyzer::start(
            trace_store,
            store,
            None,
            Duration::from_secs(3600),
            Arc::new(TileAnalyzerCounters::new()),
        );

        let mut delta = Delta::new();
        delta.entry(TestName::from("t1")).or_default().insert(pixeltriage_core::Digest::from("d_12"), Label::Positive);
        analyzer.set_digest_labels(&delta, "u").unwrap();

        let (summary, _) = analyzer.get_test_details(&TestName::from("t1"), &Query::default());
        assert!(summary.untriaged_digests.iter().all(|d| d.as_str() != "d_12"));
        analyzer.shutdown();
    }
}
