//! Lock ordering + debug-only deadlock prevention + contention
//! instrumentation (teacher precedent: `mcp-agent-mail-core::lock_order`,
//! generalized from the mail system's DB/storage/tools hierarchy to this
//! repo's expectations-cache / tile-index / diff-store hierarchy).
//!
//! Spec §5 calls for: the ExpectationsStore master cache behind one
//! `RWMutex`, the Analyzer's atomic TileIndex swap, and two DiffStore
//! directory mutexes (images, diffs) plus independently-locked LRUs. This
//! module gives each of those a `LockLevel` and enforces, in debug builds
//! only, that a thread holding one may only acquire a lock with a
//! strictly higher rank — catching an accidental cross-subsystem
//! deadlock before it ships.
//!
//! Zero release overhead in release builds: the ordering check compiles
//! to nothing outside `debug_assertions`. Contention instrumentation
//! (acquire/contended counts, wait/hold time) is always on and is cheap:
//! `try_lock()` first, so an uncontended acquire costs a couple of atomic
//! increments.

#![allow(clippy::missing_const_for_fn)]

#[cfg(debug_assertions)]
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

trait DurationNanosU64 {
    fn as_nanos_u64(&self) -> u64;
}

impl DurationNanosU64 for std::time::Duration {
    #[inline]
    fn as_nanos_u64(&self) -> u64 {
        self.as_nanos().try_into().unwrap_or(u64::MAX)
    }
}

/// Global lock hierarchy for this repo. Lower rank must be acquired
/// before higher rank when locks are nested.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockLevel {
    ExpectationsMasterCache,
    ExpectationsOverlayNone,
    TileIndexSwap,
    DiffStoreMetricsLru,
    DiffStoreImagesDir,
    DiffStoreDiffsDir,
}

impl LockLevel {
    pub const ALL: [Self; 6] = [
        Self::ExpectationsMasterCache,
        Self::ExpectationsOverlayNone,
        Self::TileIndexSwap,
        Self::DiffStoreMetricsLru,
        Self::DiffStoreImagesDir,
        Self::DiffStoreDiffsDir,
    ];
    pub const COUNT: usize = Self::ALL.len();

    #[must_use]
    pub const fn rank(self) -> u16 {
        match self {
            Self::ExpectationsMasterCache => 0,
            Self::ExpectationsOverlayNone => 1,
            Self::TileIndexSwap => 2,
            Self::DiffStoreMetricsLru => 3,
            Self::DiffStoreImagesDir => 4,
            Self::DiffStoreDiffsDir => 5,
        }
    }

    #[must_use]
    pub const fn ordinal(self) -> usize {
        self.rank() as usize
    }
}

impl std::fmt::Display for LockLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

struct LockStats {
    acquire_count: AtomicU64,
    contended_count: AtomicU64,
    total_wait_ns: AtomicU64,
    total_hold_ns: AtomicU64,
    max_wait_ns: AtomicU64,
    max_hold_ns: AtomicU64,
}

impl LockStats {
    const fn new() -> Self {
        Self {
            acquire_count: AtomicU64::new(0),
            contended_count: AtomicU64::new(0),
            total_wait_ns: AtomicU64::new(0),
            total_hold_ns: AtomicU64::new(0),
            max_wait_ns: AtomicU64::new(0),
            max_hold_ns: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_acquire(&self, contended: bool, wait_ns: u64) {
        self.acquire_count.fetch_add(1, Ordering::Relaxed);
        if contended {
            self.contended_count.fetch_add(1, Ordering::Relaxed);
            self.total_wait_ns.fetch_add(wait_ns, Ordering::Relaxed);
            update_max(&self.max_wait_ns, wait_ns);
        }
    }

    #[inline]
    fn record_hold(&self, hold_ns: u64) {
        self.total_hold_ns.fetch_add(hold_ns, Ordering::Relaxed);
        update_max(&self.max_hold_ns, hold_ns);
    }
}

#[inline]
fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(current, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

fn global_lock_stats() -> &'static [LockStats] {
    static STATS: std::sync::OnceLock<Vec<LockStats>> = std::sync::OnceLock::new();
    STATS.get_or_init(|| (0..LockLevel::COUNT).map(|_| LockStats::new()).collect())
}

/// Snapshot of contention metrics for a single lock level.
#[derive(Debug, Clone)]
pub struct LockContentionEntry {
    pub lock_name: String,
    pub rank: u16,
    pub acquire_count: u64,
    pub contended_count: u64,
    pub total_wait_ns: u64,
    pub total_hold_ns: u64,
}

/// Returns a snapshot of contention metrics for all levels acquired at
/// least once.
#[must_use]
pub fn lock_contention_snapshot() -> Vec<LockContentionEntry> {
    let stats = global_lock_stats();
    LockLevel::ALL
        .iter()
        .filter_map(|&level| {
            let s = &stats[level.ordinal()];
            let acquires = s.acquire_count.load(Ordering::Relaxed);
            if acquires == 0 {
                return None;
            }
            Some(LockContentionEntry {
                lock_name: format!("{level:?}"),
                rank: level.rank(),
                acquire_count: acquires,
                contended_count: s.contended_count.load(Ordering::Relaxed),
                total_wait_ns: s.total_wait_ns.load(Ordering::Relaxed),
                total_hold_ns: s.total_hold_ns.load(Ordering::Relaxed),
            })
        })
        .collect()
}

#[cfg(debug_assertions)]
thread_local! {
    static HELD_LOCKS: RefCell<Vec<LockLevel>> = const { RefCell::new(Vec::new()) };
}

#[inline]
#[allow(unused_variables)]
fn check_before_acquire(level: LockLevel) {
    #[cfg(debug_assertions)]
    HELD_LOCKS.with(|held| {
        let held = held.borrow();
        let Some(&last) = held.last() else {
            return;
        };
        assert!(
            level.rank() > last.rank(),
            "lock order violation: attempting to acquire {level} while holding {last}"
        );
    });
}

#[inline]
#[allow(unused_variables)]
fn did_acquire(level: LockLevel) {
    #[cfg(debug_assertions)]
    HELD_LOCKS.with(|held| held.borrow_mut().push(level));
}

#[inline]
#[allow(unused_variables)]
fn did_release(level: LockLevel) {
    #[cfg(debug_assertions)]
    HELD_LOCKS.with(|held| {
        let mut held = held.borrow_mut();
        let last = held.pop();
        debug_assert_eq!(last, Some(level), "lock tracking corrupted");
    });
}

/// Mutex wrapper enforcing the global lock hierarchy in debug builds.
pub struct OrderedMutex<T> {
    level: LockLevel,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    #[must_use]
    pub const fn new(level: LockLevel, value: T) -> Self {
        Self { level, inner: Mutex::new(value) }
    }

    pub fn lock(&self) -> OrderedMutexGuard<'_, T> {
        check_before_acquire(self.level);
        let stats = &global_lock_stats()[self.level.ordinal()];
        match self.inner.try_lock() {
            Ok(guard) => {
                stats.record_acquire(false, 0);
                did_acquire(self.level);
                OrderedMutexGuard { level: self.level, acquired_at: Instant::now(), guard }
            }
            Err(std::sync::TryLockError::WouldBlock) => {
                let start = Instant::now();
                let guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                stats.record_acquire(true, start.elapsed().as_nanos_u64());
                did_acquire(self.level);
                OrderedMutexGuard { level: self.level, acquired_at: Instant::now(), guard }
            }
            Err(std::sync::TryLockError::Poisoned(e)) => {
                stats.record_acquire(false, 0);
                did_acquire(self.level);
                OrderedMutexGuard { level: self.level, acquired_at: Instant::now(), guard: e.into_inner() }
            }
        }
    }
}

pub struct OrderedMutexGuard<'a, T> {
    level: LockLevel,
    acquired_at: Instant,
    guard: MutexGuard<'a, T>,
}

impl<T> Drop for OrderedMutexGuard<'_, T> {
    fn drop(&mut self) {
        global_lock_stats()[self.level.ordinal()].record_hold(self.acquired_at.elapsed().as_nanos_u64());
        did_release(self.level);
    }
}

impl<T> Deref for OrderedMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// `RwLock` wrapper enforcing the same hierarchy. Used for the
/// ExpectationsStore master cache (spec §4.2, §5) and the Analyzer's
/// TileIndex swap point (spec §4.1, §5).
pub struct OrderedRwLock<T> {
    level: LockLevel,
    inner: RwLock<T>,
}

impl<T> OrderedRwLock<T> {
    #[must_use]
    pub const fn new(level: LockLevel, value: T) -> Self {
        Self { level, inner: RwLock::new(value) }
    }

    pub fn read(&self) -> OrderedRwLockReadGuard<'_, T> {
        check_before_acquire(self.level);
        let stats = &global_lock_stats()[self.level.ordinal()];
        let start = Instant::now();
        let guard = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let wait = start.elapsed().as_nanos_u64();
        stats.record_acquire(wait > 0, wait);
        did_acquire(self.level);
        OrderedRwLockReadGuard { level: self.level, acquired_at: Instant::now(), guard }
    }

    pub fn write(&self) -> OrderedRwLockWriteGuard<'_, T> {
        check_before_acquire(self.level);
        let stats = &global_lock_stats()[self.level.ordinal()];
        let start = Instant::now();
        let guard = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let wait = start.elapsed().as_nanos_u64();
        stats.record_acquire(wait > 0, wait);
        did_acquire(self.level);
        OrderedRwLockWriteGuard { level: self.level, acquired_at: Instant::now(), guard }
    }
}

pub struct OrderedRwLockReadGuard<'a, T> {
    level: LockLevel,
    acquired_at: Instant,
    guard: RwLockReadGuard<'a, T>,
}

impl<T> Drop for OrderedRwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        global_lock_stats()[self.level.ordinal()].record_hold(self.acquired_at.elapsed().as_nanos_u64());
        did_release(self.level);
    }
}

impl<T> Deref for OrderedRwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

pub struct OrderedRwLockWriteGuard<'a, T> {
    level: LockLevel,
    acquired_at: Instant,
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> Drop for OrderedRwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        global_lock_stats()[self.level.ordinal()].record_hold(self.acquired_at.elapsed().as_nanos_u64());
        did_release(self.level);
    }
}

impl<T> Deref for OrderedRwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_mutex_roundtrips_value() {
        let m = OrderedMutex::new(LockLevel::DiffStoreImagesDir, 0_i32);
        *m.lock() += 1;
        assert_eq!(*m.lock(), 1);
    }

    #[test]
    fn ordered_rwlock_allows_concurrent_reads() {
        let l = OrderedRwLock::new(LockLevel::ExpectationsMasterCache, vec![1, 2, 3]);
        let r1 = l.read();
        let r2 = l.read();
        assert_eq!(r1.len(), 3);
        assert_eq!(r2.len(), 3);
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore)]
    #[should_panic(expected = "lock order violation")]
    fn out_of_order_acquire_panics_in_debug() {
        let a = OrderedMutex::new(LockLevel::DiffStoreDiffsDir, ());
        let b = OrderedMutex::new(LockLevel::DiffStoreImagesDir, ());
        let _ga = a.lock();
        let _gb = b.lock();
    }
}
