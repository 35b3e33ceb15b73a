//! Generic keyed cache with TTL-gated fresh reads and stale fallback reads.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
    cached_at: DateTime<Utc>,
    /// Test hook: artificial extra age, so expiry paths can be exercised
    /// without sleeping.
    extra_age: Duration,
}

impl<V> Entry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            cached_at: Utc::now(),
            extra_age: Duration::ZERO,
        }
    }

    fn age(&self) -> Duration {
        self.inserted_at.elapsed() + self.extra_age
    }
}

/// A value read past its TTL, together with when it was cached.
#[derive(Debug, Clone)]
pub struct StaleEntry<V> {
    pub value: V,
    pub cached_at: DateTime<Utc>,
    /// True when the entry would also have been served by a fresh read.
    pub is_fresh: bool,
}

/// Keyed store where `get` only returns entries younger than the TTL and
/// `get_stale` returns whatever is present for fallback reads.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the entry iff it was inserted within the TTL window.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        let entry = entries.get(key)?;
        if entry.age() <= self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Returns the entry regardless of TTL, for fallback reads after a
    /// failed refresh.
    pub fn get_stale(&self, key: &K) -> Option<StaleEntry<V>> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        let entry = entries.get(key)?;
        Some(StaleEntry {
            value: entry.value.clone(),
            cached_at: entry.cached_at,
            is_fresh: entry.age() <= self.ttl,
        })
    }

    pub fn set(&self, key: K, value: V) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(key, Entry::new(value));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ages an entry so TTL expiry paths can be exercised without sleeping.
    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &K, age: Duration) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.extra_age += age;
            entry.cached_at =
                entry.cached_at - chrono::Duration::from_std(age).unwrap_or_default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_get_returns_exact_value() {
        let cache: TtlCache<&str, u64> = TtlCache::new(Duration::from_secs(60));
        cache.set("k", 42);
        assert_eq!(cache.get(&"k"), Some(42));
    }

    #[test]
    fn expired_entry_only_visible_via_get_stale() {
        let cache: TtlCache<&str, u64> = TtlCache::new(Duration::from_secs(60));
        cache.set("k", 42);
        cache.backdate(&"k", Duration::from_secs(120));

        assert_eq!(cache.get(&"k"), None);
        let stale = cache.get_stale(&"k").expect("stale entry present");
        assert_eq!(stale.value, 42);
        assert!(!stale.is_fresh);
        assert!(stale.cached_at < Utc::now());
    }

    #[test]
    fn set_refreshes_insertion_time() {
        let cache: TtlCache<&str, u64> = TtlCache::new(Duration::from_secs(60));
        cache.set("k", 1);
        cache.backdate(&"k", Duration::from_secs(120));
        cache.set("k", 2);
        assert_eq!(cache.get(&"k"), Some(2));
    }

    #[test]
    fn invalidate_and_clear() {
        let cache: TtlCache<&str, u64> = TtlCache::new(Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
