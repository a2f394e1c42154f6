use std::sync::Arc;

use orrery_core::{
    ChannelId, PermissionsNode, PlanetId, PlanetMember, PlanetRole, RoleId, TargetType, UserId,
};

use crate::{
    state::EngineState,
    store::{with_timeout, StoreError},
};

/// One held role plus its override node at the target under evaluation,
/// already in authority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAndNode {
    pub role: PlanetRole,
    pub node: Option<PermissionsNode>,
}

/// Resolves the member for `(user, planet)` through the process-wide id
/// cache. A cache hit is re-verified against the row it points at; a
/// stale hit (row gone, soft-deleted, or rebound) is dropped and the
/// lookup falls back to the store, so a deleted member id is never
/// returned.
///
/// # Errors
/// Returns [`StoreError`] when the backing store fails or times out.
pub async fn member_by_user(
    state: &EngineState,
    user_id: UserId,
    planet_id: PlanetId,
) -> Result<Option<PlanetMember>, StoreError> {
    let limit = state.config.store_timeout;

    if let Some(member_id) = state.member_ids.get(user_id, planet_id).await {
        let member = with_timeout(limit, state.store.member(member_id)).await?;
        match member {
            Some(member)
                if !member.is_deleted
                    && member.user_id == user_id
                    && member.planet_id == planet_id =>
            {
                return Ok(Some(member));
            }
            _ => {
                tracing::debug!(
                    event = "permissions.member_cache.stale",
                    user_id = %user_id,
                    planet_id = %planet_id,
                    member_id = %member_id
                );
                state.member_ids.invalidate(user_id, planet_id).await;
            }
        }
    }

    let member = with_timeout(limit, state.store.live_member_by_user(user_id, planet_id)).await?;
    if let Some(member) = &member {
        state
            .member_ids
            .insert(user_id, planet_id, member.id)
            .await;
    }
    Ok(member)
}

/// The member's held roles, most authoritative first (position ascending),
/// memoized by membership hash with an exact re-check on every hit.
///
/// # Errors
/// Returns [`StoreError`] when the backing store fails or times out.
pub async fn roles_ordered(
    state: &EngineState,
    member: &PlanetMember,
) -> Result<Arc<Vec<PlanetRole>>, StoreError> {
    if let Some(cached) = state
        .role_lists
        .get(member.planet_id, member.membership)
        .await
    {
        return Ok(cached);
    }

    let all = with_timeout(
        state.config.store_timeout,
        state.store.planet_roles(member.planet_id),
    )
    .await?;

    let mut held: Vec<PlanetRole> = all
        .into_iter()
        .filter(|role| member.membership.contains(role.flag_index))
        .collect();
    held.sort_by_key(|role| role.position);

    let held = Arc::new(held);
    state
        .role_lists
        .insert(member.planet_id, member.membership, Arc::clone(&held))
        .await;
    Ok(held)
}

/// Ordered roles joined with their nodes at one target, fetched as a
/// single batch so the evaluation loop costs two round trips total.
///
/// # Errors
/// Returns [`StoreError`] when the backing store fails or times out.
pub async fn roles_with_nodes(
    state: &EngineState,
    member: &PlanetMember,
    target_id: ChannelId,
    target_type: TargetType,
) -> Result<Vec<RoleAndNode>, StoreError> {
    let roles = roles_ordered(state, member).await?;
    if roles.is_empty() {
        return Ok(Vec::new());
    }

    let role_ids: Vec<RoleId> = roles.iter().map(|role| role.id).collect();
    let mut nodes = with_timeout(
        state.config.store_timeout,
        state.store.nodes_for_target(&role_ids, target_id, target_type),
    )
    .await?;

    Ok(roles
        .iter()
        .map(|role| RoleAndNode {
            role: role.clone(),
            node: nodes.remove(&role.id),
        })
        .collect())
}
