//! Shared domain types, error handling, configuration, metrics, and
//! concurrency primitives for the pixeltriage visual-regression core.
//!
//! This crate provides:
//! - Domain types (`TestName`, `Digest`, `Label`, `Trace`, `Expectations`, …)
//! - The shared error enum and `Result` alias
//! - Configuration loaded from environment variables
//! - Lock-free metrics counters per subsystem
//! - Lock-ordering/contention instrumentation (`OrderedMutex`, `OrderedRwLock`)
//! - Exponential backoff + circuit breaker for backend-transient errors
//! - Process-wide logging init and test fixtures shared across crates

#![forbid(unsafe_code)]

pub mod cancellation;
pub mod config;
pub mod error;
pub mod lock_order;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod types;

#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use cancellation::{Cancelled, Cx, Outcome, OutcomeError};
pub use config::Config;
pub use error::{Error, Result};
pub use lock_order::{LockLevel, OrderedMutex, OrderedRwLock};
pub use retry::{CircuitBreaker, CircuitState, RetryConfig};
pub use types::{
    BlameDistribution, ChangeEntry, Closest, Commit, CorpusStatus, Delta, DeltaEntry, Digest,
    DiffMetrics, ExpectationChange, Expectations, Label, LabeledTrace, LogTotal, Params,
    Summary, TestName, Trace, TriageLogEntry, delta_entries, EMPTY_IMAGE_DIGEST, MISSING_DIGEST,
};
