use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Observable cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    hits: u64,
}

/// TTL + LRU read-through cache.
///
/// Keys are entity ids (`task:<id>`, `msg:<id>`) or coarse query keys
/// (`bot_tasks:<agent>`). Expired entries are dropped on read; the oldest
/// entry is evicted when capacity is reached. Writes to an entity must call
/// [`QueryCache::invalidate`] with the entity id so every derived key that
/// mentions it is dropped too.
pub struct QueryCache<V> {
    ttl: Duration,
    max_size: usize,
    entries: HashMap<String, Entry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Defaults: TTL 30 s, 100 entries.
    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(30), 100)
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        match self.entries.get_mut(key) {
            None => {
                self.misses += 1;
                None
            }
            Some(entry) if entry.inserted_at.elapsed() > self.ttl => {
                self.entries.remove(key);
                self.misses += 1;
                None
            }
            Some(entry) => {
                entry.hits += 1;
                self.hits += 1;
                Some(entry.value.clone())
            }
        }
    }

    pub fn set(&mut self, key: &str, value: V) {
        if self.entries.len() >= self.max_size && !self.entries.contains_key(key) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                self.entries.remove(&k);
                self.evictions += 1;
            }
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted_at: Instant::now(),
                hits: 0,
            },
        );
    }

    /// Drop every entry whose key contains `pattern`. An empty pattern
    /// clears the cache.
    pub fn invalidate(&mut self, pattern: &str) {
        if pattern.is_empty() {
            self.entries.clear();
            return;
        }
        self.entries.retain(|k, _| !k.contains(pattern));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            size: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_miss_and_stats() {
        let mut cache: QueryCache<i32> = QueryCache::with_defaults();
        assert_eq!(cache.get("a"), None);
        cache.set("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn ttl_expiry() {
        let mut cache: QueryCache<i32> = QueryCache::new(Duration::from_millis(0), 10);
        cache.set("a", 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let mut cache: QueryCache<i32> = QueryCache::new(Duration::from_secs(60), 2);
        cache.set("a", 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("b", 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("c", 3); // evicts "a" (oldest)
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn pattern_invalidation_drops_derived_keys() {
        let mut cache: QueryCache<i32> = QueryCache::with_defaults();
        cache.set("task:t1", 1);
        cache.set("bot_tasks:coder", 2);
        cache.set("task:t2", 3);
        cache.invalidate("t1");
        assert_eq!(cache.get("task:t1"), None);
        assert_eq!(cache.get("task:t2"), Some(3));
        assert_eq!(cache.get("bot_tasks:coder"), Some(2));
    }
}
