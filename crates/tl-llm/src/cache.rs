// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded TTL cache for LLM responses.
//!
//! Keys are SHA-256 digests of the canonical request; values are the
//! generated text.  Capacity-bounded with oldest-insertion eviction, so a
//! burst of distinct prompts cannot grow the process without bound.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A single cached entry.
struct Entry {
    value: String,
    inserted: Instant,
    ttl: Duration,
}

/// Bounded TTL cache keyed by request digest.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

struct CacheInner {
    map: HashMap<String, Entry>,
    order: VecDeque<String>,
}

impl ResponseCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Look up `key`, returning the value when present and unexpired.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut guard = self.inner.lock().expect("cache lock poisoned");
        match guard.map.get(key) {
            Some(entry) if entry.inserted.elapsed() <= entry.ttl => Some(entry.value.clone()),
            Some(_) => {
                guard.map.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert `value` under `key` with the given TTL, evicting the oldest
    /// insertion when full.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        let key = key.into();
        let mut guard = self.inner.lock().expect("cache lock poisoned");
        while guard.map.len() >= self.capacity && !guard.map.contains_key(&key) {
            match guard.order.pop_front() {
                Some(oldest) => {
                    guard.map.remove(&oldest);
                }
                None => break,
            }
        }
        if !guard.map.contains_key(&key) {
            guard.order.push_back(key.clone());
        }
        guard.map.insert(
            key,
            Entry {
                value: value.into(),
                inserted: Instant::now(),
                ttl,
            },
        );
    }

    /// Number of live entries (expired entries may still be counted until
    /// their next lookup).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").map.len()
    }

    /// True when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
