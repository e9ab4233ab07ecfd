//! Short-lived per-process cache of spreadsheet reads.
//!
//! Keyed by `(tenant, table)`. Entries expire after a fixed TTL and are
//! dropped on any write through an adapter for the same key. The cache is
//! local to one process; nothing assumes it is coherent across instances.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

struct Entry<V> {
    value: Arc<V>,
    stored_at: Instant,
}

/// TTL cache shared by all adapters in the process.
pub struct RecordCache<V> {
    entries: DashMap<(String, String), Entry<V>>,
    ttl: Duration,
}

impl<V> RecordCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached value for the key, if present and younger than the TTL.
    pub fn get(&self, tenant_id: &str, table: &str) -> Option<Arc<V>> {
        let key = (tenant_id.to_string(), table.to_string());
        let fresh = {
            let entry = self.entries.get(&key)?;
            (entry.stored_at.elapsed() < self.ttl).then(|| entry.value.clone())
        };
        if fresh.is_none() {
            self.entries.remove(&key);
        }
        fresh
    }

    pub fn insert(&self, tenant_id: &str, table: &str, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.entries.insert(
            (tenant_id.to_string(), table.to_string()),
            Entry {
                value: value.clone(),
                stored_at: Instant::now(),
            },
        );
        value
    }

    pub fn invalidate(&self, tenant_id: &str, table: &str) {
        if self
            .entries
            .remove(&(tenant_id.to_string(), table.to_string()))
            .is_some()
        {
            tracing::debug!(tenant_id = %tenant_id, table = %table, "Record cache invalidated");
        }
    }

    /// Drop every entry for a tenant (source reconfigured).
    pub fn invalidate_tenant(&self, tenant_id: &str) {
        self.entries.retain(|(tenant, _), _| tenant != tenant_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for RecordCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_invalidate() {
        let cache: RecordCache<Vec<u32>> = RecordCache::default();
        assert!(cache.get("t1", "Sheet1").is_none());

        cache.insert("t1", "Sheet1", vec![1, 2, 3]);
        assert_eq!(*cache.get("t1", "Sheet1").unwrap(), vec![1, 2, 3]);

        cache.invalidate("t1", "Sheet1");
        assert!(cache.get("t1", "Sheet1").is_none());
    }

    #[test]
    fn test_keys_are_per_tenant_and_table() {
        let cache: RecordCache<u32> = RecordCache::default();
        cache.insert("t1", "A", 1);
        cache.insert("t1", "B", 2);
        cache.insert("t2", "A", 3);

        cache.invalidate("t1", "A");
        assert!(cache.get("t1", "A").is_none());
        assert_eq!(*cache.get("t1", "B").unwrap(), 2);
        assert_eq!(*cache.get("t2", "A").unwrap(), 3);

        cache.invalidate_tenant("t1");
        assert!(cache.get("t1", "B").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entries_expire() {
        let cache: RecordCache<u32> = RecordCache::new(Duration::from_millis(20));
        cache.insert("t1", "A", 1);
        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get("t1", "A").is_none());
        assert!(cache.is_empty());
    }
}
