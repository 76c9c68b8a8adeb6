//! TTL cache of resolution plans.
//!
//! A plan is the list of canonical member names a path resolved through for
//! a given concrete type. Plans carry no values, so entries can be shared
//! between instances of the same type without leaking data between them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// Cache key: concrete type name and the path as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    type_name: String,
    path: String,
}

impl CacheKey {
    fn new(type_name: &str, path: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            path: path.to_string(),
        }
    }
}

struct CachedPlan {
    members: Arc<[String]>,
    expires_at: Instant,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionCacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL elapsed.
    pub evictions: u64,
    /// Entries dropped by writes through a path.
    pub invalidations: u64,
}

impl ResolutionCacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Process-wide resolution cache keyed by `(type name, path)`.
pub struct ResolutionCache {
    entries: DashMap<CacheKey, CachedPlan>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl ResolutionCache {
    /// Default time-to-live of a cached plan.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached plan, or `None` if absent or expired.
    pub fn get(&self, type_name: &str, path: &str) -> Option<Arc<[String]>> {
        let key = CacheKey::new(type_name, path);
        let now = Instant::now();

        if let Some(entry) = self.entries.get(&key) {
            if entry.expires_at > now {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.members));
            }
            drop(entry);
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, type_name: &str, path: &str, members: Vec<String>) {
        self.entries.insert(
            CacheKey::new(type_name, path),
            CachedPlan {
                members: members.into(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drops the plan for `path` and every path below it.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, type_name: &str, path: &str) -> usize {
        let prefix = format!("{path}.");
        let mut removed = 0;

        self.entries.retain(|key, _| {
            let affected =
                key.type_name == type_name && (key.path == path || key.path.starts_with(&prefix));
            if affected {
                removed += 1;
            }
            !affected
        });

        if removed > 0 {
            self.invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Removes expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ResolutionCacheStats {
        ResolutionCacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_get_insert_and_stats() {
        let cache = ResolutionCache::default();
        assert!(cache.get("Risk", "owner").is_none());

        cache.insert("Risk", "owner", plan(&["Owner"]));
        let members = cache.get("Risk", "owner").unwrap();
        assert_eq!(&*members, &["Owner".to_string()]);

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_keys_are_scoped_by_type() {
        let cache = ResolutionCache::default();
        cache.insert("Risk", "owner", plan(&["Owner"]));

        assert!(cache.get("Control", "owner").is_none());
    }

    #[test]
    fn test_invalidate_removes_descendants_only() {
        let cache = ResolutionCache::default();
        cache.insert("T", "metadata.labels", plan(&["metadata", "labels"]));
        cache.insert("T", "metadata.labels.x", plan(&["metadata", "labels", "x"]));
        cache.insert("T", "metadata.labelsx", plan(&["metadata", "labelsx"]));
        cache.insert("U", "metadata.labels", plan(&["metadata", "labels"]));

        assert_eq!(cache.invalidate("T", "metadata.labels"), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("T", "metadata.labelsx").is_some());
        assert!(cache.get("U", "metadata.labels").is_some());
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[test]
    fn test_expired_entries_are_evicted() {
        let cache = ResolutionCache::new(Duration::ZERO);
        cache.insert("T", "a", plan(&["a"]));

        assert!(cache.get("T", "a").is_none());
        assert_eq!(cache.stats().evictions, 1);

        cache.insert("T", "b", plan(&["b"]));
        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.is_empty());
    }
}
