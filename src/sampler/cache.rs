use std::sync::Arc;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::debug;

use crate::error::Result;
use crate::store::{ShardKey, ShardStore, VadShard};

/// Default number of shards kept in memory.
pub const DEFAULT_CACHE_CAPACITY: u64 = 16;

/// Hit/load counters for a [`ShardCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub loads: u64,
}

/// Bounded least-recently-used cache of loaded shards.
///
/// Shards are loaded on first use and never modified afterwards; callers get
/// an `Arc` so an evicted shard stays valid for the call holding it.
pub struct ShardCache {
    store: ShardStore,
    shards: Cache<ShardKey, Arc<VadShard>>,
    capacity: u64,
    stats: CacheStats,
}

impl ShardCache {
    pub fn new(store: ShardStore, capacity: u64) -> Self {
        let shards = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self {
            store,
            shards,
            capacity,
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn store(&self) -> &ShardStore {
        &self.store
    }

    /// Fetch a shard, loading it from the store on a miss.
    pub fn get(&mut self, key: &ShardKey) -> Result<Arc<VadShard>> {
        if let Some(shard) = self.shards.get(key) {
            self.stats.hits += 1;
            return Ok(shard);
        }

        let shard = Arc::new(self.store.load(key)?);
        self.stats.loads += 1;
        debug!("Loaded shard {} ({} files)", key, shard.len());

        self.shards.insert(key.clone(), Arc::clone(&shard));
        Ok(shard)
    }

    pub fn contains(&self, key: &ShardKey) -> bool {
        self.shards.contains_key(key)
    }

    /// Number of cached shards after pending evictions are applied.
    pub fn len(&self) -> u64 {
        self.shards.run_pending_tasks();
        self.shards.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
