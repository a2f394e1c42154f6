use std::collections::HashMap;
use std::sync::Arc;

use orrery_core::{MemberId, PlanetId, PlanetRole, RoleMembership, UserId};
use tokio::sync::RwLock;

/// Process-wide `(user, planet) -> member id` lookup, populated lazily on
/// first resolution and invalidated on member deletion. Entries are whole
/// values; readers never observe a partial write.
#[derive(Default)]
pub(crate) struct MemberIdCache {
    entries: RwLock<HashMap<(UserId, PlanetId), MemberId>>,
}

impl MemberIdCache {
    pub(crate) async fn get(&self, user_id: UserId, planet_id: PlanetId) -> Option<MemberId> {
        self.entries.read().await.get(&(user_id, planet_id)).copied()
    }

    pub(crate) async fn insert(&self, user_id: UserId, planet_id: PlanetId, member_id: MemberId) {
        self.entries
            .write()
            .await
            .insert((user_id, planet_id), member_id);
    }

    pub(crate) async fn invalidate(&self, user_id: UserId, planet_id: PlanetId) {
        self.entries.write().await.remove(&(user_id, planet_id));
    }

    #[cfg(test)]
    pub(crate) async fn contains(&self, user_id: UserId, planet_id: PlanetId) -> bool {
        self.entries
            .read()
            .await
            .contains_key(&(user_id, planet_id))
    }
}

struct CachedRoleList {
    membership: RoleMembership,
    roles: Arc<Vec<PlanetRole>>,
}

/// Memoized ordered role lists keyed by `(planet, membership hash)`. A
/// hash is only a key: hits re-verify the full membership words and a
/// mismatch is treated as a miss and logged, never as equality.
pub(crate) struct RoleCache {
    entries: RwLock<HashMap<(PlanetId, u64), CachedRoleList>>,
    capacity: usize,
}

impl RoleCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub(crate) async fn get(
        &self,
        planet_id: PlanetId,
        membership: RoleMembership,
    ) -> Option<Arc<Vec<PlanetRole>>> {
        let entries = self.entries.read().await;
        let cached = entries.get(&(planet_id, membership.hash()))?;
        if cached.membership == membership {
            return Some(Arc::clone(&cached.roles));
        }
        tracing::warn!(
            event = "permissions.membership_hash.collision",
            planet_id = %planet_id,
            hash = membership.hash()
        );
        None
    }

    pub(crate) async fn insert(
        &self,
        planet_id: PlanetId,
        membership: RoleMembership,
        roles: Arc<Vec<PlanetRole>>,
    ) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity {
            entries.clear();
        }
        entries.insert((planet_id, membership.hash()), CachedRoleList { membership, roles });
    }

    /// Drops every cached list of the planet. Called after any role
    /// mutation so stale orderings never outlive the change.
    pub(crate) async fn invalidate_planet(&self, planet_id: PlanetId) {
        self.entries
            .write()
            .await
            .retain(|(cached_planet, _), _| *cached_planet != planet_id);
    }
}
