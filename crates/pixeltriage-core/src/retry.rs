//! Exponential backoff + circuit breaker for `BackendTransient` errors
//! (spec §4.2 write algorithm step 4, §7 `BackendTransient`).
//!
//! Generalized from the SQLite-lock-contention retry helper in
//! `mcp-agent-mail-db::retry` to any transient backend failure: document
//! store commits, live-snapshot reconnects, object-store downloads.
//!
//! # Backoff schedule (defaults)
//!
//! Initial 1s, multiplier 2, capped by `max_delay`, with ±25% jitter to
//! avoid thundering-herd retries across shards.
//!
//! # Circuit breaker
//!
//! After `threshold` consecutive failures the circuit opens for
//! `reset_duration`, failing fast; a success after the reset window closes
//! it again.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thread-safe circuit breaker. Uses atomics so reads never block.
pub struct CircuitBreaker {
    failures: AtomicU32,
    open_until_us: AtomicU64,
    threshold: u32,
    reset_duration: Duration,
    epoch: Instant,
}

impl CircuitBreaker {
    /// 5 consecutive failures before opening, 30s reset window, the same
    /// defaults as `mcp-agent-mail-db::retry::CircuitBreaker::new`,
    /// reused here for shard snapshot reconnects (spec §4.2 read path).
    #[must_use]
    pub fn new() -> Self {
        Self::with_params(5, Duration::from_secs(30))
    }

    #[must_use]
    pub fn with_params(threshold: u32, reset_duration: Duration) -> Self {
        Self {
            failures: AtomicU32::new(0),
            open_until_us: AtomicU64::new(0),
            threshold,
            reset_duration,
            epoch: Instant::now(),
        }
    }

    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros().try_into().unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        let open_until = self.open_until_us.load(Ordering::Relaxed);
        if open_until == 0 {
            return CircuitState::Closed;
        }
        if self.now_us() >= open_until {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Returns `true` if a call is allowed to proceed right now.
    #[must_use]
    pub fn allow(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
        self.open_until_us.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold {
            let open_until = self
                .now_us()
                .saturating_add(self.reset_duration.as_micros().try_into().unwrap_or(u64::MAX));
            self.open_until_us.store(open_until, Ordering::Relaxed);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff parameters. `max_total` bounds the whole retry loop (spec
/// §4.2's `maxOperationTime` ≈ 2 min budget for one `addChange` call).
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_total: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 7,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_total: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// `min(base * 2^attempt, max_delay)` with ±25% jitter (0-indexed
    /// attempt).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = base_ms.mul_add(2.0_f64.powi(exponent), 0.0).min(max_ms);

        let jitter = jitter_factor();
        let jittered = raw.mul_add(0.25 * jitter, raw);
        let clamped = jittered.max(10.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ms = clamped as u64;
        Duration::from_millis(ms)
    }
}

/// Generates a jitter factor in `[-1.0, 1.0]` using a simple LCG — avoids
/// pulling in `rand` for something that only needs to break
/// synchronization, not be cryptographically random. Same approach as
/// `mcp-agent-mail-db::retry::jitter_factor`.
fn jitter_factor() -> f64 {
    static SEED: AtomicU64 = AtomicU64::new(0);

    let prev = SEED.load(Ordering::Relaxed);
    if prev == 0 {
        let init = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(12345, |d| {
                let ns = d.as_nanos();
                u64::try_from(ns).unwrap_or(u64::MAX)
            });
        let _ = SEED.compare_exchange(0, init, Ordering::Relaxed, Ordering::Relaxed);
    }

    let a: u64 = 6_364_136_223_846_793_005;
    let c: u64 = 1_442_695_040_888_963_407;
    let old = SEED.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
        Some(x.wrapping_mul(a).wrapping_add(c))
    });
    let val = old.unwrap_or(42);

    #[allow(clippy::cast_precision_loss)]
    let mapped = (val as f64 / u64::MAX as f64).mul_add(2.0, -1.0);
    mapped
}
