//! SIEVE eviction cache with per-entry expiry.
//!
//! - On access (hit): set the entry's `visited` bit to `true`.
//! - On insert (miss + full): scan from the `hand` position:
//!   - If `visited == true`, reset to `false` and advance the hand.
//!   - If `visited == false`, evict this entry and insert the new one here.
//!
//! Entries older than the configured TTL are treated as absent and dropped on
//! lookup. Time is passed in by the caller so expiry is deterministic in tests.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

/// A bounded cache using the SIEVE eviction algorithm.
#[derive(Debug)]
pub(crate) struct SieveCache<K, V> {
    /// Circular buffer of cache entries.
    entries: Vec<Option<Entry<K, V>>>,
    /// Maps keys to their index in `entries`.
    index: HashMap<K, usize>,
    /// Current hand position for the SIEVE scan.
    hand: usize,
    capacity: usize,
    ttl: Duration,
    /// Current number of live entries.
    len: usize,
}

#[derive(Debug, Clone)]
struct Entry<K, V> {
    key: K,
    value: V,
    inserted_at: DateTime<Utc>,
    visited: bool,
}

impl<K, V> SieveCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries (at least one),
    /// each valid for `ttl`.
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        let entries = (0..capacity).map(|_| None).collect();

        Self {
            entries,
            index: HashMap::with_capacity(capacity),
            hand: 0,
            capacity,
            ttl,
            len: 0,
        }
    }

    /// Returns a copy of the value for `key` if present and fresh, marking it
    /// as recently used. Expired entries are removed.
    pub(crate) fn get(&mut self, key: &K, now: DateTime<Utc>) -> Option<V> {
        let &idx = self.index.get(key)?;
        let expired = match &self.entries[idx] {
            Some(entry) => now - entry.inserted_at >= self.ttl,
            None => return None,
        };
        if expired {
            self.remove(key);
            return None;
        }
        let entry = self.entries[idx].as_mut()?;
        entry.visited = true;
        Some(entry.value.clone())
    }

    /// Inserts a key-value pair, evicting if at capacity.
    pub(crate) fn insert(&mut self, key: K, value: V, now: DateTime<Utc>) {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(entry) = &mut self.entries[idx] {
                entry.value = value;
                entry.inserted_at = now;
                entry.visited = true;
                return;
            }
        }

        let slot = if self.len < self.capacity {
            self.entries.iter().position(Option::is_none)
        } else {
            None
        };

        let idx = if let Some(free) = slot {
            self.len += 1;
            free
        } else {
            let victim = self.find_eviction_target();
            if let Some(old_entry) = &self.entries[victim] {
                self.index.remove(&old_entry.key);
            }
            victim
        };

        self.entries[idx] = Some(Entry {
            key: key.clone(),
            value,
            inserted_at: now,
            visited: false,
        });
        self.index.insert(key, idx);
    }

    /// Removes a key from the cache.
    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        let entry = self.entries[idx].take()?;
        self.len -= 1;
        Some(entry.value)
    }

    /// Removes every entry whose key satisfies `predicate`. Returns the
    /// number of entries removed.
    pub(crate) fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let doomed: Vec<K> = self.index.keys().filter(|k| predicate(k)).cloned().collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Scans from `hand` to find an entry with `visited == false`.
    /// Resets `visited` bits along the way.
    fn find_eviction_target(&mut self) -> usize {
        // At most 2 full scans: the first pass resets visited bits.
        let max_iterations = self.capacity * 2;

        for _ in 0..max_iterations {
            let current = self.hand;
            self.hand = (self.hand + 1) % self.capacity;
            match &mut self.entries[current] {
                Some(entry) if entry.visited => entry.visited = false,
                _ => return current,
            }
        }

        let target = self.hand;
        self.hand = (self.hand + 1) % self.capacity;
        target
    }
}
