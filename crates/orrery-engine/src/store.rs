use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use orrery_core::{
    Channel, ChannelId, MemberId, PermissionsNode, Planet, PlanetId, PlanetMember, PlanetRole,
    RoleId, TargetType, UserId,
};
use orrery_protocol::RelayedMessage;

pub mod memory;
pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backing store timed out")]
    Timeout,
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("backing store rejected the row: {0}")]
    Conflict(String),
}

/// Row lookups and mutations the engine needs from the storage
/// collaborator. Lookups the evaluation loop depends on are batched:
/// [`Self::nodes_for_target`] fetches every node of one evaluation in a
/// single round trip.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Allocates a fresh row id for members and roles created here.
    async fn allocate_id(&self) -> Result<i64, StoreError>;

    async fn planet(&self, id: PlanetId) -> Result<Option<Planet>, StoreError>;

    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, StoreError>;

    async fn member(&self, id: MemberId) -> Result<Option<PlanetMember>, StoreError>;

    /// The non-deleted member row for (user, planet), if any.
    async fn live_member_by_user(
        &self,
        user_id: UserId,
        planet_id: PlanetId,
    ) -> Result<Option<PlanetMember>, StoreError>;

    /// The member row for (user, planet) including soft-deleted rows, so a
    /// rejoin restores the original row instead of duplicating it.
    async fn member_by_user_any(
        &self,
        user_id: UserId,
        planet_id: PlanetId,
    ) -> Result<Option<PlanetMember>, StoreError>;

    async fn role(&self, id: RoleId) -> Result<Option<PlanetRole>, StoreError>;

    /// Every role of the planet, in no particular order.
    async fn planet_roles(&self, planet_id: PlanetId) -> Result<Vec<PlanetRole>, StoreError>;

    /// All permission nodes for the given roles at one target, keyed by
    /// role. One round trip regardless of how many roles are held.
    async fn nodes_for_target(
        &self,
        role_ids: &[RoleId],
        target_id: ChannelId,
        target_type: TargetType,
    ) -> Result<HashMap<RoleId, PermissionsNode>, StoreError>;

    async fn node(
        &self,
        role_id: RoleId,
        target_id: ChannelId,
        target_type: TargetType,
    ) -> Result<Option<PermissionsNode>, StoreError>;

    async fn insert_member(&self, member: &PlanetMember) -> Result<(), StoreError>;

    async fn update_member(&self, member: &PlanetMember) -> Result<(), StoreError>;

    async fn insert_role(&self, role: &PlanetRole) -> Result<(), StoreError>;

    async fn update_role(&self, role: &PlanetRole) -> Result<(), StoreError>;

    /// Rewrites positions for a reorder in one operation.
    async fn update_role_positions(
        &self,
        planet_id: PlanetId,
        positions: &[(RoleId, u32)],
    ) -> Result<(), StoreError>;

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError>;

    /// Clears one role flag bit from every member of the planet.
    async fn clear_role_flag(&self, planet_id: PlanetId, flag_index: u8)
        -> Result<(), StoreError>;

    async fn upsert_node(&self, node: &PermissionsNode) -> Result<(), StoreError>;

    async fn delete_node(
        &self,
        role_id: RoleId,
        target_id: ChannelId,
        target_type: TargetType,
    ) -> Result<(), StoreError>;

    async fn delete_nodes_for_role(&self, role_id: RoleId) -> Result<(), StoreError>;
}

/// Where the staging worker seeds channel indices from and persists staged
/// batches to.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Count of messages already persisted for the channel; the next
    /// staged message gets this as its index.
    async fn message_count(&self, channel_id: ChannelId) -> Result<u64, StoreError>;

    /// Persists one staged batch. The batch arrives in per-channel index
    /// order and must be written in that order.
    async fn persist_batch(&self, batch: &[RelayedMessage]) -> Result<(), StoreError>;
}

/// Bounds one backing-store call. Elapsed limits surface as
/// [`StoreError::Timeout`], which permission checks resolve to deny.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, StoreError>> + Send,
) -> Result<T, StoreError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}
