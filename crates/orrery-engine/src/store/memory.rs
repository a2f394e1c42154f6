use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use orrery_core::{
    Channel, ChannelId, MemberId, PermissionsNode, Planet, PlanetId, PlanetMember, PlanetRole,
    RoleId, TargetType, UserId,
};
use orrery_protocol::RelayedMessage;
use tokio::sync::RwLock;

use super::{MessageSink, PermissionStore, StoreError};

/// In-memory backing store. The default for tests and for embedders that
/// run without a database; every table is a whole-value map behind its own
/// lock.
#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    planets: RwLock<HashMap<PlanetId, Planet>>,
    channels: RwLock<HashMap<ChannelId, Channel>>,
    members: RwLock<HashMap<MemberId, PlanetMember>>,
    roles: RwLock<HashMap<RoleId, PlanetRole>>,
    nodes: RwLock<HashMap<(RoleId, ChannelId, TargetType), PermissionsNode>>,
    messages: RwLock<Vec<RelayedMessage>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1_000),
            ..Self::default()
        }
    }

    pub async fn insert_planet(&self, planet: Planet) {
        self.planets.write().await.insert(planet.id, planet);
    }

    pub async fn insert_channel(&self, channel: Channel) {
        self.channels.write().await.insert(channel.id, channel);
    }

    /// Messages persisted for one channel, in write order.
    pub async fn persisted_messages(&self, channel_id: ChannelId) -> Vec<RelayedMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|message| message.channel_id == channel_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn allocate_id(&self) -> Result<i64, StoreError> {
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn planet(&self, id: PlanetId) -> Result<Option<Planet>, StoreError> {
        Ok(self.planets.read().await.get(&id).copied())
    }

    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, StoreError> {
        Ok(self.channels.read().await.get(&id).copied())
    }

    async fn member(&self, id: MemberId) -> Result<Option<PlanetMember>, StoreError> {
        Ok(self.members.read().await.get(&id).cloned())
    }

    async fn live_member_by_user(
        &self,
        user_id: UserId,
        planet_id: PlanetId,
    ) -> Result<Option<PlanetMember>, StoreError> {
        Ok(self
            .members
            .read()
            .await
            .values()
            .find(|member| {
                member.user_id == user_id && member.planet_id == planet_id && !member.is_deleted
            })
            .cloned())
    }

    async fn member_by_user_any(
        &self,
        user_id: UserId,
        planet_id: PlanetId,
    ) -> Result<Option<PlanetMember>, StoreError> {
        Ok(self
            .members
            .read()
            .await
            .values()
            .find(|member| member.user_id == user_id && member.planet_id == planet_id)
            .cloned())
    }

    async fn role(&self, id: RoleId) -> Result<Option<PlanetRole>, StoreError> {
        Ok(self.roles.read().await.get(&id).cloned())
    }

    async fn planet_roles(&self, planet_id: PlanetId) -> Result<Vec<PlanetRole>, StoreError> {
        Ok(self
            .roles
            .read()
            .await
            .values()
            .filter(|role| role.planet_id == planet_id)
            .cloned()
            .collect())
    }

    async fn nodes_for_target(
        &self,
        role_ids: &[RoleId],
        target_id: ChannelId,
        target_type: TargetType,
    ) -> Result<HashMap<RoleId, PermissionsNode>, StoreError> {
        let nodes = self.nodes.read().await;
        Ok(role_ids
            .iter()
            .filter_map(|role_id| {
                nodes
                    .get(&(*role_id, target_id, target_type))
                    .map(|node| (*role_id, *node))
            })
            .collect())
    }

    async fn node(
        &self,
        role_id: RoleId,
        target_id: ChannelId,
        target_type: TargetType,
    ) -> Result<Option<PermissionsNode>, StoreError> {
        Ok(self
            .nodes
            .read()
            .await
            .get(&(role_id, target_id, target_type))
            .copied())
    }

    async fn insert_member(&self, member: &PlanetMember) -> Result<(), StoreError> {
        let mut members = self.members.write().await;
        if members.contains_key(&member.id) {
            return Err(StoreError::Conflict(format!(
                "member {} already exists",
                member.id
            )));
        }
        members.insert(member.id, member.clone());
        Ok(())
    }

    async fn update_member(&self, member: &PlanetMember) -> Result<(), StoreError> {
        let mut members = self.members.write().await;
        if !members.contains_key(&member.id) {
            return Err(StoreError::Conflict(format!("member {} missing", member.id)));
        }
        members.insert(member.id, member.clone());
        Ok(())
    }

    async fn insert_role(&self, role: &PlanetRole) -> Result<(), StoreError> {
        let mut roles = self.roles.write().await;
        if roles.contains_key(&role.id) {
            return Err(StoreError::Conflict(format!("role {} already exists", role.id)));
        }
        roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role(&self, role: &PlanetRole) -> Result<(), StoreError> {
        let mut roles = self.roles.write().await;
        if !roles.contains_key(&role.id) {
            return Err(StoreError::Conflict(format!("role {} missing", role.id)));
        }
        roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role_positions(
        &self,
        planet_id: PlanetId,
        positions: &[(RoleId, u32)],
    ) -> Result<(), StoreError> {
        let mut roles = self.roles.write().await;
        for (role_id, position) in positions {
            let Some(role) = roles.get_mut(role_id) else {
                return Err(StoreError::Conflict(format!("role {role_id} missing")));
            };
            if role.planet_id != planet_id {
                return Err(StoreError::Conflict(format!(
                    "role {role_id} is not in planet {planet_id}"
                )));
            }
            role.position = *position;
        }
        Ok(())
    }

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        self.roles.write().await.remove(&id);
        Ok(())
    }

    async fn clear_role_flag(
        &self,
        planet_id: PlanetId,
        flag_index: u8,
    ) -> Result<(), StoreError> {
        let mut members = self.members.write().await;
        for member in members.values_mut() {
            if member.planet_id == planet_id {
                member.membership = member.membership.without(flag_index);
            }
        }
        Ok(())
    }

    async fn upsert_node(&self, node: &PermissionsNode) -> Result<(), StoreError> {
        self.nodes
            .write()
            .await
            .insert((node.role_id, node.target_id, node.target_type), *node);
        Ok(())
    }

    async fn delete_node(
        &self,
        role_id: RoleId,
        target_id: ChannelId,
        target_type: TargetType,
    ) -> Result<(), StoreError> {
        self.nodes
            .write()
            .await
            .remove(&(role_id, target_id, target_type));
        Ok(())
    }

    async fn delete_nodes_for_role(&self, role_id: RoleId) -> Result<(), StoreError> {
        self.nodes
            .write()
            .await
            .retain(|(node_role, _, _), _| *node_role != role_id);
        Ok(())
    }
}

#[async_trait]
impl MessageSink for MemoryStore {
    async fn message_count(&self, channel_id: ChannelId) -> Result<u64, StoreError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|message| message.channel_id == channel_id)
            .count() as u64)
    }

    async fn persist_batch(&self, batch: &[RelayedMessage]) -> Result<(), StoreError> {
        self.messages.write().await.extend_from_slice(batch);
        Ok(())
    }
}
