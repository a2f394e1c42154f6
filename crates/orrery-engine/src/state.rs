use std::sync::Arc;

use crate::{
    cache::{MemberIdCache, RoleCache},
    config::EngineConfig,
    relay::RelayNotifier,
    store::PermissionStore,
};

/// Shared runtime state for the permission engine: the storage
/// collaborator, the relay seam, and the process-wide caches. Cloning is
/// cheap; all clones observe the same caches.
#[derive(Clone)]
pub struct EngineState {
    pub(crate) store: Arc<dyn PermissionStore>,
    pub(crate) relay: Arc<dyn RelayNotifier>,
    pub(crate) member_ids: Arc<MemberIdCache>,
    pub(crate) role_lists: Arc<RoleCache>,
    pub(crate) config: Arc<EngineConfig>,
}

impl EngineState {
    #[must_use]
    pub fn new(
        store: Arc<dyn PermissionStore>,
        relay: Arc<dyn RelayNotifier>,
        config: EngineConfig,
    ) -> Self {
        let role_cache_capacity = config.role_cache_capacity;
        Self {
            store,
            relay,
            member_ids: Arc::new(MemberIdCache::default()),
            role_lists: Arc::new(RoleCache::new(role_cache_capacity)),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
