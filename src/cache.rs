//! Expiring key/value cache shared across limiter callers.
//!
//! The source system kept these as hidden module-level statics; here the
//! cache is an explicit object the owner creates once and hands to every
//! consumer behind an `Arc`. Staleness up to the TTL is accepted by design.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A mutex-protected map whose entries carry their own expiry deadline.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.lock();
        entries.insert(key, (Instant::now() + ttl, value));
    }

    /// Fetch a live entry; an expired one is dropped and reads as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((deadline, value)) if *deadline > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// All keys whose entries have not expired yet.
    pub fn live_keys(&self) -> Vec<K> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, (deadline, _)| *deadline > now);
        entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.live_keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, (Instant, V)>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
