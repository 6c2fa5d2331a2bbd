//! Singleflight request coalescing for concurrent identical downloads/diff
//! computations, adapted from `mcp-agent-mail-db::coalesce`.
//!
//! The DiffStore worker pool already serializes work per canonical key
//! (spec §4.3 "Symmetry & dedup": one key, one slot in the response
//! channel), but two callers can still race to enqueue the *same* key
//! before either worker request lands. This shard map is defense in
//! depth: the first caller for a key becomes the leader and runs the
//! work; everyone else blocks on a `Condvar` and clones the leader's
//! result.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

const NUM_SHARDS: usize = 16;

enum SlotState<V> {
    Pending,
    Ready(V),
    Failed(String),
}

struct Slot<V> {
    state: Mutex<SlotState<V>>,
    done: Condvar,
}

impl<V: Clone> Slot<V> {
    fn new() -> Self {
        Self { state: Mutex::new(SlotState::Pending), done: Condvar::new() }
    }

    fn complete_ok(&self, value: &V) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *state = SlotState::Ready(value.clone());
        drop(state);
        self.done.notify_all();
    }

    fn complete_err(&self, msg: String) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *state = SlotState::Failed(msg);
        drop(state);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<V, String> {
        let guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let guard = self
            .done
            .wait_while(guard, |s| matches!(s, SlotState::Pending))
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match &*guard {
            SlotState::Ready(v) => Ok(v.clone()),
            SlotState::Failed(msg) => Err(msg.clone()),
            SlotState::Pending => unreachable!("condvar spurious wakeup"),
        }
    }
}

fn shard_for(key: &str) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % NUM_SHARDS
}

/// Sharded singleflight map keyed by `String` (canonical diff basename or
/// digest). `V` must be cheap to clone — joiners receive a clone of the
/// leader's result.
pub struct Coalescer<V> {
    shards: Vec<Mutex<HashMap<String, Arc<Slot<V>>>>>,
    pub joins: std::sync::atomic::AtomicU64,
}

impl<V: Clone> Coalescer<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            joins: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Runs `f` for `key` if no other call for `key` is in flight;
    /// otherwise blocks until the in-flight call completes and returns a
    /// clone of its result.
    pub fn run_or_join(&self, key: &str, f: impl FnOnce() -> Result<V, String>) -> Result<V, String> {
        let shard = &self.shards[shard_for(key)];
        let (slot, is_leader) = {
            let mut map = shard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(existing) = map.get(key) {
                (Arc::clone(existing), false)
            } else {
                let slot = Arc::new(Slot::new());
                map.insert(key.to_string(), Arc::clone(&slot));
                (slot, true)
            }
        };

        if !is_leader {
            self.joins.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return slot.wait();
        }

        let result = f();
        match &result {
            Ok(v) => slot.complete_ok(v),
            Err(e) => slot.complete_err(e.clone()),
        }
        {
            let mut map = shard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            map.remove(key);
        }
        result
    }
}

impl<V: Clone> Default for Coalescer<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn concurrent_callers_for_the_same_key_share_one_execution() {
        let coalescer = Arc::new(Coalescer::<u32>::new());
        let executions = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let coalescer = Arc::clone(&coalescer);
            let executions = Arc::clone(&executions);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                coalescer.run_or_join("k", || {
                    executions.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(std::time::Duration::from_millis(20));
                    Ok(42)
                })
            }));
        }
        for h in handles {
            assert_eq!(h.join().unwrap(), Ok(42));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_keys_do_not_coalesce() {
        let coalescer = Coalescer::<u32>::new();
        assert_eq!(coalescer.run_or_join("a", || Ok(1)), Ok(1));
        assert_eq!(coalescer.run_or_join("b", || Ok(2)), Ok(2));
    }
}
