//! Bootstrap wiring for the pixeltriage core (SPEC_FULL "AMBIENT STACK —
//! workspace shape"): construct the EventBus, ExpectationsStore,
//! Analyzer, and DiffStore/Warmer against in-memory reference backends,
//! and expose a readiness snapshot. Not an HTTP server — the RPC surface
//! is an explicit Non-goal; this binary exists only so the workspace has
//! an ambient config -> logging -> services bootstrap shape.

#![forbid(unsafe_code)]

use std::sync::Arc;

use pixeltriage_core::metrics::{DiffStoreMetrics, ExpectationsMetrics, TileAnalyzerMetrics};
use pixeltriage_core::metrics::{ExpectationsCounters, TileAnalyzerCounters};
use pixeltriage_core::{Config, Error, Result};
use pixeltriage_diffstore::{DiffStore, DiffStoreConfig, MemoryObjectStore, ObjectStore, Warmer};
use pixeltriage_eventbus::EventBus;
use pixeltriage_expectations::{DocumentStore, ExpectationsStore, MemoryDocumentStore};
use pixeltriage_tileindex::{Analyzer, InMemoryTraceStore, Tile, TraceStore};

/// A running process: every subsystem wired together. Dropping this
/// stops the Analyzer's background poll thread and the
/// ExpectationsStore's shard workers (spec §5: best-effort, coarse
/// polling shutdown).
pub struct App {
    pub config: Config,
    pub event_bus: Arc<EventBus>,
    pub expectations: Arc<ExpectationsStore>,
    pub analyzer: Arc<Analyzer>,
    pub diff_store: Arc<DiffStore>,
    pub warmer: Warmer,
    expectations_metrics: Arc<ExpectationsCounters>,
    tile_metrics: Arc<TileAnalyzerCounters>,
}

/// Aggregate counters snapshot across every subsystem (SPEC_FULL ambient
/// stack: readiness probes consume this).
#[derive(Debug, Default, serde::Serialize)]
pub struct Readiness {
    pub analyzer: TileAnalyzerMetrics,
    pub expectations: ExpectationsMetrics,
    pub diffstore: DiffStoreMetrics,
}

impl App {
    /// Wires the process using in-memory reference implementations of
    /// every external collaborator (`TraceStore`, `DocumentStore`,
    /// `ObjectStore`) — spec §1 lists the real backends (raw trace-store
    /// format, Firestore, GCS) as out of scope collaborators this repo
    /// only specifies the consumed operations of.
    pub fn bootstrap(config: Config, trace_store: Arc<dyn TraceStore>) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new());

        let doc_store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let expectations_metrics = Arc::new(ExpectationsCounters::new());
        let expectations = Arc::new(ExpectationsStore::open_master(
            doc_store,
            &config,
            Some(Arc::clone(&event_bus)),
            Arc::clone(&expectations_metrics),
        ));

        let tile_metrics = Arc::new(TileAnalyzerCounters::new());
        let analyzer = Analyzer::start(
            trace_store,
            Arc::clone(&expectations),
            Some(Arc::clone(&event_bus)),
            config.poll_interval,
            Arc::clone(&tile_metrics),
        );

        let object_store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let diff_store = Arc::new(
            DiffStore::new(
                object_store,
                DiffStoreConfig {
                    bucket: "pixeltriage".into(),
                    base_dir: config.diffstore_base_dir.clone(),
                    worker_count: config.diffstore_worker_count,
                    max_uri_get_tries: config.max_uri_get_tries,
                    lru_capacity: config.diffstore_lru_capacity,
                },
            )
            .map_err(Error::from)?,
        );
        let warmer = Warmer::new(Arc::clone(&diff_store));

        Ok(Self { config, event_bus, expectations, analyzer, diff_store, warmer, expectations_metrics, tile_metrics })
    }

    /// Convenience constructor for a deployment with no external trace
    /// backend configured (see [`InMemoryTraceStore`]'s doc comment).
    pub fn bootstrap_with_empty_tile(config: Config) -> Result<Self> {
        let trace_store: Arc<dyn TraceStore> = Arc::new(InMemoryTraceStore::new(Tile::default()));
        Self::bootstrap(config, trace_store)
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        Readiness {
            analyzer: self.tile_metrics.snapshot(),
            expectations: self.expectations_metrics.snapshot(),
            diffstore: self.diff_store.metrics_snapshot(),
        }
    }

    /// Runs one warming pass over the Analyzer's current summaries (spec's
    /// data-flow note "Analyzer (status, blame) -> Warmer -> DiffStore").
    /// Best-effort: a failed pass is logged, not propagated, since warming
    /// is a cache-priming side effect, not a correctness requirement.
    pub fn warm_once(&self, cx: &pixeltriage_core::Cx) {
        let (summaries, _) = self.analyzer.list_test_details(&pixeltriage_tileindex::Query::default());
        let observed = self.analyzer.observed_digests_by_test();
        let expectations = self.analyzer.expectations();
        match self.warmer.warm(&summaries, None, &observed, &expectations, cx) {
            Ok(report) => {
                tracing::debug!(processed = report.processed, errors = report.errors, "warmer pass complete");
            }
            Err(e) => tracing::warn!(error = %e, "warmer pass failed"),
        }
    }

    pub fn shutdown(&self) {
        self.analyzer.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_with_empty_tile_wires_every_subsystem() {
        let app = App::bootstrap_with_empty_tile(Config::default()).unwrap();
        let (summaries, _) = app.analyzer.list_test_details(&pixeltriage_tileindex::Query::default());
        assert!(summaries.is_empty());
        app.shutdown();
    }

    #[test]
    fn warm_once_on_an_empty_tile_is_a_no_op() {
        let app = App::bootstrap_with_empty_tile(Config::default()).unwrap();
        app.warm_once(&pixeltriage_core::Cx::new());
        app.shutdown();
    }
}
