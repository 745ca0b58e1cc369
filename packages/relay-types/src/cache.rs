//! Bounded, TTL-evicting cache keyed by an arbitrary `Eq + Hash` key,
//! generalizing the teacher's `[u8; 32]`-only `BoundedHashCache` to the
//! value-bearing caches C7's pending-deal cache and C10's
//! duplicate-request guard both need.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

pub struct BoundedCache<K, V> {
    map: HashMap<K, (V, Instant)>,
    max_size: usize,
    ttl: Duration,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            max_size,
            ttl,
        }
    }

    /// Returns the value for `key` if present and not expired.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map
            .get(key)
            .filter(|(_, t)| t.elapsed() < self.ttl)
            .map(|(v, _)| v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or overwrites `key`, evicting expired entries first and,
    /// if still at capacity, the single oldest remaining entry.
    pub fn insert(&mut self, key: K, value: V) {
        let now = Instant::now();
        self.map.retain(|_, (_, t)| now.duration_since(*t) < self.ttl);

        while self.map.len() >= self.max_size && !self.map.contains_key(&key) {
            let oldest = self.map.iter().min_by_key(|(_, (_, t))| *t).map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.map.remove(&k);
                }
                None => break,
            }
        }

        self.map.insert(key, (value, now));
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(v, _)| v)
    }

    /// Drops expired entries; used by callers that want to bound memory
    /// on a scheduled tick rather than only on insert.
    pub fn evict_expired(&mut self) {
        let now = Instant::now();
        self.map.retain(|_, (_, t)| now.duration_since(*t) < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
