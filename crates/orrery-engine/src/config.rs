use std::time::Duration;

pub const DEFAULT_STORE_TIMEOUT_MILLIS: u64 = 2_000;
pub const DEFAULT_MAX_INHERITANCE_DEPTH: usize = 32;
pub const DEFAULT_ROLE_CACHE_CAPACITY: usize = 4_096;
pub const DEFAULT_STAGING_QUEUE_CAPACITY: usize = 1_024;
pub const DEFAULT_STAGING_FLUSH_INTERVAL_MILLIS: u64 = 30_000;
pub const DEFAULT_STAGING_BATCH_LIMIT: usize = 128;

/// Tunables for the permission engine and the staging worker.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upper bound on any single backing-store call made during a
    /// permission check. An elapsed timeout resolves the check to deny.
    pub store_timeout: Duration,
    /// Cap on the channel inheritance walk. A chain this deep is a data
    /// integrity bug; evaluation stops at the last node reached.
    pub max_inheritance_depth: usize,
    /// Entries held in the ordered-role cache before it is flushed.
    pub role_cache_capacity: usize,
    /// Bounded staging queue depth; enqueue past it is backpressure.
    pub staging_queue_capacity: usize,
    /// How often the staging worker persists the staged batch.
    pub staging_flush_interval: Duration,
    /// Most messages drained from the queue in one pass.
    pub staging_batch_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MILLIS),
            max_inheritance_depth: DEFAULT_MAX_INHERITANCE_DEPTH,
            role_cache_capacity: DEFAULT_ROLE_CACHE_CAPACITY,
            staging_queue_capacity: DEFAULT_STAGING_QUEUE_CAPACITY,
            staging_flush_interval: Duration::from_millis(DEFAULT_STAGING_FLUSH_INTERVAL_MILLIS),
            staging_batch_limit: DEFAULT_STAGING_BATCH_LIMIT,
        }
    }
}
