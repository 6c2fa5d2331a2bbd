//! Lock-free metrics primitives (teacher precedent:
//! `mcp-agent-mail-core::metrics`). Hot-path recording is O(1), no
//! allocation, no locks; snapshotting loads the atomics once.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counter {
    v: AtomicU64,
}

impl Counter {
    #[must_use]
    pub const fn new() -> Self {
        Self { v: AtomicU64::new(0) }
    }

    #[inline]
    pub fn inc(&self) {
        self.v.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, delta: u64) {
        self.v.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    #[must_use]
    pub fn load(&self) -> u64 {
        self.v.load(Ordering::Relaxed)
    }
}

/// Snapshot of the Analyzer/poll-loop counters (SPEC_FULL §4.1 ambient
/// stack: every tick increments these).
#[derive(Debug, Default, Serialize)]
pub struct TileAnalyzerMetrics {
    pub poll_total: u64,
    pub poll_errors_total: u64,
    pub poll_last_trace_count: u64,
    pub poll_last_duration_ms: u64,
}

#[derive(Debug, Default)]
pub struct TileAnalyzerCounters {
    pub poll_total: Counter,
    pub poll_errors_total: Counter,
    pub poll_last_trace_count: Counter,
    pub poll_last_duration_ms: Counter,
}

impl TileAnalyzerCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_total: Counter::new(),
            poll_errors_total: Counter::new(),
            poll_last_trace_count: Counter::new(),
            poll_last_duration_ms: Counter::new(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> TileAnalyzerMetrics {
        TileAnalyzerMetrics {
            poll_total: self.poll_total.load(),
            poll_errors_total: self.poll_errors_total.load(),
            poll_last_trace_count: self.poll_last_trace_count.load(),
            poll_last_duration_ms: self.poll_last_duration_ms.load(),
        }
    }
}

/// Snapshot of the DiffStore counters (SPEC_FULL §4.3 ambient stack).
#[derive(Debug, Default, Serialize)]
pub struct DiffStoreMetrics {
    pub download_attempts_total: u64,
    pub download_failures_total: u64,
    pub decode_failures_total: u64,
    pub cache_hits_total: u64,
    pub cache_misses_total: u64,
    pub coalesce_joins_total: u64,
}

/// `coalesce_joins_total` is deliberately not a field here: the join
/// count lives on the two `Coalescer`s inside `DiffStore` (each already
/// tracks its own `joins: AtomicU64`), so `DiffStore::metrics_snapshot`
/// reads those directly into `DiffStoreMetrics::coalesce_joins_total`
/// rather than duplicating the count in a second, easily-forgotten
/// counter.
#[derive(Debug, Default)]
pub struct DiffStoreCounters {
    pub download_attempts_total: Counter,
    pub download_failures_total: Counter,
    pub decode_failures_total: Counter,
    pub cache_hits_total: Counter,
    pub cache_misses_total: Counter,
}

impl DiffStoreCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            download_attempts_total: Counter::new(),
            download_failures_total: Counter::new(),
            decode_failures_total: Counter::new(),
            cache_hits_total: Counter::new(),
            cache_misses_total: Counter::new(),
        }
    }

    /// Partial snapshot; callers combine this with the live coalescer join
    /// counts (see `DiffStore::metrics_snapshot`) to fill
    /// `coalesce_joins_total`.
    #[must_use]
    pub fn snapshot(&self) -> DiffStoreMetrics {
        DiffStoreMetrics {
            download_attempts_total: self.download_attempts_total.load(),
            download_failures_total: self.download_failures_total.load(),
            decode_failures_total: self.decode_failures_total.load(),
            cache_hits_total: self.cache_hits_total.load(),
            cache_misses_total: self.cache_misses_total.load(),
            coalesce_joins_total: 0,
        }
    }
}

/// Snapshot of the ExpectationsStore counters.
#[derive(Debug, Default, Serialize)]
pub struct ExpectationsMetrics {
    pub add_change_total: u64,
    pub add_change_retries_total: u64,
    pub undo_total: u64,
    pub snapshot_reconnects_total: u64,
}

#[derive(Debug, Default)]
pub struct ExpectationsCounters {
    pub add_change_total: Counter,
    pub add_change_retries_total: Counter,
    pub undo_total: Counter,
    pub snapshot_reconnects_total: Counter,
}

impl ExpectationsCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            add_change_total: Counter::new(),
            add_change_retries_total: Counter::new(),
            undo_total: Counter::new(),
            snapshot_reconnects_total: Counter::new(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ExpectationsMetrics {
        ExpectationsMetrics {
            add_change_total: self.add_change_total.load(),
            add_change_retries_total: self.add_change_retries_total.load(),
            undo_total: self.undo_total.load(),
            snapshot_reconnects_total: self.snapshot_reconnects_total.load(),
        }
    }
}
