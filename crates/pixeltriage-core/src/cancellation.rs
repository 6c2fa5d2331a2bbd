//! Cooperative cancellation context (spec §5: "Parallel threads with
//! cooperative cancellation via a per-operation context").
//!
//! `Cx` is a deadline + cancel flag threaded through any call that can
//! suspend (backend I/O, downloads, disk writes, the Analyzer/Warmer
//! loops). `Outcome<T, E>` is the cooperative result type every such call
//! returns, distinguishing a cancelled/deadline-exceeded exit from a
//! genuine error so callers can propagate `CancelledOrDeadline` as-is
//! (spec §7) instead of retrying it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CxInner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// A per-operation cancellation/deadline context. Cheap to clone (an
/// `Arc` around a couple of atomics); child contexts share the parent's
/// cancel flag so cancelling a parent cancels every in-flight child call.
#[derive(Debug, Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Cx {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(CxInner { cancelled: AtomicBool::new(false), deadline: None }) }
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CxInner {
                cancelled: AtomicBool::new(false),
                deadline: Some(Instant::now() + timeout),
            }),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self.inner.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns `Err(())` if the context is cancelled or past its
    /// deadline. Call at loop/iteration boundaries (spec §5 "Warmer and
    /// poll loops check context at each iteration boundary").
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl Default for Cx {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker returned by [`Cx::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Cooperative result type for operations that accept a [`Cx`]. Mirrors
/// the structured-concurrency call-site shape in
/// `mcp-agent-mail-db::pool::acquire`: a success, a semantic error, a
/// cooperative cancellation, or (rarely) a propagated panic payload from a
/// worker thread.
#[derive(Debug)]
pub enum Outcome<T, E> {
    Ok(T),
    Err(E),
    Cancelled,
}

impl<T, E> Outcome<T, E> {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn into_result(self) -> Result<T, OutcomeError<E>> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) => Err(OutcomeError::Err(e)),
            Self::Cancelled => Err(OutcomeError::Cancelled),
        }
    }
}

#[derive(Debug)]
pub enum OutcomeError<E> {
    Err(E),
    Cancelled,
}

impl<E: std::fmt::Display> std::fmt::Display for OutcomeError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Err(e) => write!(f, "{e}"),
            Self::Cancelled => write!(f, "operation cancelled or deadline exceeded"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for OutcomeError<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cx_is_not_cancelled() {
        let cx = Cx::new();
        assert!(cx.check().is_ok());
    }

    #[test]
    fn cancel_is_observed() {
        let cx = Cx::new();
        cx.cancel();
        assert!(cx.check().is_err());
    }

    #[test]
    fn deadline_in_the_past_is_cancelled() {
        let cx = Cx::with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cx.is_cancelled());
    }

    #[test]
    fn cloned_cx_shares_cancel_state() {
        let cx = Cx::new();
        let clone = cx.clone();
        clone.cancel();
        assert!(cx.is_cancelled());
    }
}
