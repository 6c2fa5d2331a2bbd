//! S3-FIFO cache eviction (Yang et al., SOSP 2023), adapted from the
//! teacher's `mcp-agent-mail-db::s3fifo` to the DiffStore's
//! `canonical-basename -> DiffMetrics` in-memory cache.
//!
//! Three FIFO queues: Small (10% of capacity, newly inserted items),
//! Main (90%, promoted items), Ghost (keys-only, recently evicted from
//! Small). On eviction, items with `freq >= 1` are promoted/retained;
//! others are dropped. Re-access of a ghost key inserts directly into
//! Main.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Small,
    Main,
    Ghost,
}

struct QueueEntry<K, V> {
    key: K,
    value: V,
    freq: u8,
}

pub struct S3FifoCache<K, V> {
    small: VecDeque<QueueEntry<K, V>>,
    main: VecDeque<QueueEntry<K, V>>,
    ghost: VecDeque<K>,
    index: HashMap<K, Location>,
    small_capacity: usize,
    main_capacity: usize,
    ghost_capacity: usize,
}

impl<K, V> S3FifoCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let small_cap = (capacity / 10).max(1);
        let main_cap = capacity - small_cap;
        Self {
            small: VecDeque::with_capacity(small_cap),
            main: VecDeque::with_capacity(main_cap),
            ghost: VecDeque::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            small_capacity: small_cap,
            main_capacity: main_cap,
            ghost_capacity: capacity,
        }
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let loc = *self.index.get(key)?;
        match loc {
            Location::Small => self.small.iter_mut().find(|e| e.key.borrow() == key).map(|e| {
                e.freq = (e.freq + 1).min(3);
                e.value.clone()
            }),
            Location::Main => self.main.iter_mut().find(|e| e.key.borrow() == key).map(|e| {
                e.freq = (e.freq + 1).min(3);
                e.value.clone()
            }),
            Location::Ghost => None,
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        if let Some(loc) = self.index.get(&key).copied() {
            match loc {
                Location::Small => {
                    if let Some(e) = self.small.iter_mut().find(|e| e.key == key) {
                        e.value = value;
                        return;
                    }
                }
                Location::Main => {
                    if let Some(e) = self.main.iter_mut().find(|e| e.key == key) {
                        e.value = value;
                        return;
                    }
                }
                Location::Ghost => {
                    self.ghost.retain(|k| k != &key);
                    self.main.push_back(QueueEntry { key: key.clone(), value, freq: 0 });
                    self.index.insert(key, Location::Main);
                    self.evict_main_if_needed();
                    return;
                }
            }
        }
        self.small.push_back(QueueEntry { key: key.clone(), value, freq: 0 });
        self.index.insert(key, Location::Small);
        self.evict_small_if_needed();
    }

    fn evict_small_if_needed(&mut self) {
        while self.small.len() > self.small_capacity {
            let Some(entry) = self.small.pop_front() else { break };
            if entry.freq >= 1 {
                self.index.insert(entry.key.clone(), Location::Main);
                self.main.push_back(QueueEntry { key: entry.key, value: entry.value, freq: 0 });
                self.evict_main_if_needed();
            } else {
                self.index.insert(entry.key.clone(), Location::Ghost);
                self.ghost.push_back(entry.key);
                while self.ghost.len() > self.ghost_capacity {
                    if let Some(evicted) = self.ghost.pop_front() {
                        self.index.remove(&evicted);
                    }
                }
            }
        }
    }

    fn evict_main_if_needed(&mut self) {
        while self.main.len() > self.main_capacity {
            let Some(mut entry) = self.main.pop_front() else { break };
            if entry.freq >= 1 {
                entry.freq -= 1;
                self.main.push_back(entry);
            } else {
                self.index.remove(&entry.key);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.small.len() + self.main.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_roundtrips() {
        let mut cache: S3FifoCache<String, u32> = S3FifoCache::new(10);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn eviction_keeps_size_bounded() {
        let mut cache: S3FifoCache<String, u32> = S3FifoCache::new(4);
        for i in 0..100 {
            cache.insert(format!("k{i}"), i);
        }
        assert!(cache.len() <= 4);
    }

    #[test]
    fn frequently_accessed_entry_survives_eviction_pressure() {
        let mut cache: S3FifoCache<String, u32> = S3FifoCache::new(4);
        cache.insert("hot".to_string(), 0);
        for i in 0..50 {
            cache.get("hot");
            cache.insert(format!("filler{i}"), i);
        }
        assert!(cache.get("hot").is_some());
    }
}
