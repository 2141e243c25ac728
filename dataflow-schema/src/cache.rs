//! Schema snapshot caching.
//!
//! Introspecting a live database costs several catalog round-trips, so the
//! migration engine keeps recent snapshots in a process-local cache. Entries
//! expire after a TTL and the cache evicts least-recently-used entries past
//! a size bound. The cache is purely a latency optimization: it is never
//! shared across processes and is safe to invalidate at any time.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::table::DatabaseSchema;

/// Default time-to-live for cached snapshots.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of cached snapshots.
pub const DEFAULT_MAX_SIZE: usize = 100;

/// A cached snapshot and its insertion time.
#[derive(Debug, Clone)]
struct CacheEntry {
    schema: DatabaseSchema,
    inserted_at: Instant,
}

/// Statistics for the schema cache.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (absent or expired).
    pub misses: u64,
    /// Number of entries evicted to honor the size bound.
    pub evictions: u64,
    /// Number of entries currently cached.
    pub cached_count: usize,
}

impl CacheStats {
    /// Get the cache hit rate.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A TTL + LRU cache of database schema snapshots, keyed by database URL.
///
/// All state is instance-scoped; create one per migration system and share
/// it by reference where needed.
#[derive(Debug)]
pub struct SchemaCache {
    // IndexMap insertion order doubles as the recency order: a hit
    // re-inserts the entry at the back, eviction pops the front.
    entries: Mutex<IndexMap<String, CacheEntry>>,
    stats: Mutex<CacheStats>,
    ttl: Duration,
    max_size: usize,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    /// Create a cache with the default TTL and size bound.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            stats: Mutex::new(CacheStats::default()),
            ttl: DEFAULT_TTL,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    /// Set the entry time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the maximum entry count.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// Get a cached snapshot, or `None` when absent or expired.
    pub fn get_cached_schema(&self, key: &str) -> Option<DatabaseSchema> {
        let mut entries = self.entries.lock();

        match entries.shift_remove(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                let schema = entry.schema.clone();
                // Re-insert at the back to mark the entry most recently used.
                entries.insert(key.to_string(), entry);
                drop(entries);
                self.stats.lock().hits += 1;
                Some(schema)
            }
            _ => {
                drop(entries);
                self.stats.lock().misses += 1;
                None
            }
        }
    }

    /// Insert or replace a snapshot for the given key.
    pub fn insert(&self, key: impl Into<String>, schema: DatabaseSchema) {
        let key = key.into();
        let mut entries = self.entries.lock();

        entries.shift_remove(&key);
        entries.insert(
            key,
            CacheEntry {
                schema,
                inserted_at: Instant::now(),
            },
        );

        let mut evicted = 0;
        while entries.len() > self.max_size {
            entries.shift_remove_index(0);
            evicted += 1;
        }
        drop(entries);

        if evicted > 0 {
            self.stats.lock().evictions += evicted;
        }
    }

    /// Remove a snapshot, returning whether one was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().shift_remove(key).is_some()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Get a snapshot of cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.lock().clone();
        stats.cached_count = self.entries.lock().len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::table::{ColumnDefinition, TableDefinition};
    use crate::types::ScalarType;

    fn schema(table: &str) -> DatabaseSchema {
        DatabaseSchema::new().with_table(
            TableDefinition::new(table)
                .with_column(ColumnDefinition::new("id", ScalarType::Int).primary_key()),
        )
    }

    #[test]
    fn test_hit_before_expiry() {
        let cache = SchemaCache::new();
        cache.insert("db1", schema("users"));

        let cached = cache.get_cached_schema("db1").expect("fresh entry");
        assert!(cached.contains_table("users"));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_miss_after_ttl() {
        let cache = SchemaCache::new().with_ttl(Duration::from_millis(30));
        cache.insert("db1", schema("users"));

        thread::sleep(Duration::from_millis(60));
        assert!(cache.get_cached_schema("db1").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_lru_eviction_at_max_size() {
        let cache = SchemaCache::new().with_max_size(2);
        cache.insert("a", schema("t_a"));
        cache.insert("b", schema("t_b"));

        // Touch "a" so "b" becomes the least recently used entry.
        assert!(cache.get_cached_schema("a").is_some());

        cache.insert("c", schema("t_c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get_cached_schema("b").is_none());
        assert!(cache.get_cached_schema("a").is_some());
        assert!(cache.get_cached_schema("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate() {
        let cache = SchemaCache::new();
        cache.insert("db1", schema("users"));

        assert!(cache.invalidate("db1"));
        assert!(!cache.invalidate("db1"));
        assert!(cache.get_cached_schema("db1").is_none());
    }

    #[test]
    fn test_insert_replaces_existing() {
        let cache = SchemaCache::new();
        cache.insert("db1", schema("old"));
        cache.insert("db1", schema("new"));

        assert_eq!(cache.len(), 1);
        let cached = cache.get_cached_schema("db1").unwrap();
        assert!(cached.contains_table("new"));
        assert!(!cached.contains_table("old"));
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = SchemaCache::new();
        cache.insert("db1", schema("users"));
        let _ = cache.get_cached_schema("db1");
        let _ = cache.get_cached_schema("absent");

        let stats = cache.stats();
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.cached_count, 1);
    }
}
