use orrery_core::{
    Channel, ChannelKind, Permission, PermissionState, Planet, PlanetMember, PlanetPermission,
    TargetType,
};

use crate::{
    errors::EngineError,
    resolver::{roles_ordered, roles_with_nodes, RoleAndNode},
    state::EngineState,
    store::{with_timeout, StoreError},
};

/// Does the member hold a planet-wide permission?
///
/// View is granted to every existing member: membership itself is
/// visibility. The owner holds everything. Otherwise any held role that is
/// admin or carries the bit suffices.
///
/// A backing-store timeout resolves to deny; other store failures surface
/// as [`EngineError::Store`] so callers can tell "could not determine"
/// from "determined: no".
///
/// # Errors
/// Returns [`EngineError::Store`] on non-timeout backing-store failure.
pub async fn has_planet_permission(
    state: &EngineState,
    member: &PlanetMember,
    permission: PlanetPermission,
) -> Result<bool, EngineError> {
    deny_on_timeout(resolve_planet_permission(state, member, permission).await)
}

/// Does the member hold a permission at a channel or category?
///
/// Implements the layered resolution order: owner bypass, inheritance
/// rollup to the effective target, admin bypass, the View gate, the
/// highest-authority-first node scan where the first explicit allow or
/// deny wins, and the fallback to the most authoritative held role's
/// category defaults (or the planet default role for members holding no
/// roles).
///
/// # Errors
/// Returns [`EngineError::Store`] on non-timeout backing-store failure.
pub async fn has_channel_permission(
    state: &EngineState,
    member: &PlanetMember,
    channel: &Channel,
    permission: Permission,
) -> Result<bool, EngineError> {
    if let Permission::Planet(planet_permission) = permission {
        return has_planet_permission(state, member, planet_permission).await;
    }
    deny_on_timeout(resolve_channel_permission(state, member, channel, permission).await)
}

/// [`has_channel_permission`] that surfaces denial as a typed error
/// naming the missing permission, for mutation paths.
///
/// # Errors
/// Returns [`EngineError::LacksPermission`] on denial and
/// [`EngineError::Store`] on non-timeout backing-store failure.
pub async fn require_channel_permission(
    state: &EngineState,
    member: &PlanetMember,
    channel: &Channel,
    permission: Permission,
) -> Result<(), EngineError> {
    if has_channel_permission(state, member, channel, permission).await? {
        Ok(())
    } else {
        Err(EngineError::LacksPermission(permission))
    }
}

fn deny_on_timeout(result: Result<bool, StoreError>) -> Result<bool, EngineError> {
    match result {
        Ok(allowed) => Ok(allowed),
        Err(StoreError::Timeout) => {
            tracing::warn!(event = "permissions.store.timeout");
            Ok(false)
        }
        Err(error) => Err(EngineError::Store(error)),
    }
}

async fn resolve_planet_permission(
    state: &EngineState,
    member: &PlanetMember,
    permission: PlanetPermission,
) -> Result<bool, StoreError> {
    if member.is_deleted {
        return Ok(false);
    }
    if matches!(permission, PlanetPermission::View) {
        return Ok(true);
    }

    let limit = state.config.store_timeout;
    let Some(planet) = with_timeout(limit, state.store.planet(member.planet_id)).await? else {
        return Ok(false);
    };
    if planet.owner_user_id == member.user_id {
        return Ok(true);
    }

    let roles = roles_ordered(state, member).await?;
    Ok(roles.iter().any(|role| {
        role.is_admin || role.planet_perms.contains(Permission::Planet(permission))
    }))
}

async fn resolve_channel_permission(
    state: &EngineState,
    member: &PlanetMember,
    channel: &Channel,
    permission: Permission,
) -> Result<bool, StoreError> {
    if member.is_deleted || member.planet_id != channel.planet_id {
        return Ok(false);
    }

    let limit = state.config.store_timeout;
    let Some(planet) = with_timeout(limit, state.store.planet(channel.planet_id)).await? else {
        return Ok(false);
    };
    if planet.owner_user_id == member.user_id {
        return Ok(true);
    }

    let effective = effective_target(state, *channel).await?;
    let target_type = permission.target_type();
    let layers = roles_with_nodes(state, member, effective.id, target_type).await?;

    if layers.iter().any(|layer| layer.role.is_admin) {
        return Ok(true);
    }

    let Some(kind) = kind_of(target_type) else {
        return Ok(false);
    };

    // A target the member cannot see grants nothing else, so View is
    // resolved first through the same walk as any other bit.
    let view = target_type.view_permission();
    if !resolve_with_fallback(state, &planet, &layers, kind, view).await? {
        return Ok(false);
    }
    if permission.mask() == view.mask() {
        return Ok(true);
    }

    resolve_with_fallback(state, &planet, &layers, kind, permission).await
}

/// Rolls an inheriting channel up to the nearest ancestor that does not
/// itself inherit. A missing parent or an over-deep chain stops the walk
/// at the last node reached; both are data-integrity faults, not crash
/// conditions.
async fn effective_target(state: &EngineState, start: Channel) -> Result<Channel, StoreError> {
    let limit = state.config.store_timeout;
    let mut current = start;
    let mut depth = 0_usize;

    while current.inherits_perms {
        let Some(parent_id) = current.parent_id else {
            break;
        };
        if depth >= state.config.max_inheritance_depth {
            tracing::warn!(
                event = "permissions.inheritance.depth_cap",
                channel_id = %start.id,
                stopped_at = %current.id,
                depth
            );
            break;
        }
        let Some(parent) = with_timeout(limit, state.store.channel(parent_id)).await? else {
            tracing::warn!(
                event = "permissions.inheritance.broken_chain",
                channel_id = %current.id,
                parent_id = %parent_id
            );
            break;
        };
        current = parent;
        depth += 1;
    }

    Ok(current)
}

async fn resolve_with_fallback(
    state: &EngineState,
    planet: &Planet,
    layers: &[RoleAndNode],
    kind: ChannelKind,
    permission: Permission,
) -> Result<bool, StoreError> {
    match resolve_state(layers, permission) {
        PermissionState::Allow => Ok(true),
        PermissionState::Deny => Ok(false),
        PermissionState::Undefined => fallback_default(state, planet, layers, kind, permission).await,
    }
}

/// Walks the ordered roles and returns the first explicit answer. Roles
/// without a node at the target, and nodes whose mask leaves the bit
/// unset, fall through to the next role down.
pub(crate) fn resolve_state(layers: &[RoleAndNode], permission: Permission) -> PermissionState {
    for layer in layers {
        if let Some(node) = &layer.node {
            match node.state_for(permission) {
                PermissionState::Undefined => {}
                decided => return decided,
            }
        }
    }
    PermissionState::Undefined
}

async fn fallback_default(
    state: &EngineState,
    planet: &Planet,
    layers: &[RoleAndNode],
    kind: ChannelKind,
    permission: Permission,
) -> Result<bool, StoreError> {
    if let Some(top) = layers.first() {
        return Ok(top.role.default_mask_for(kind).contains(permission));
    }

    let limit = state.config.store_timeout;
    let Some(default_role) = with_timeout(limit, state.store.role(planet.default_role_id)).await?
    else {
        tracing::error!(
            event = "permissions.default_role.missing",
            planet_id = %planet.id,
            role_id = %planet.default_role_id
        );
        return Ok(false);
    };
    Ok(default_role.default_mask_for(kind).contains(permission))
}

const fn kind_of(target_type: TargetType) -> Option<ChannelKind> {
    match target_type {
        TargetType::ChatChannel => Some(ChannelKind::Chat),
        TargetType::Category => Some(ChannelKind::Category),
        TargetType::VoiceChannel => Some(ChannelKind::Voice),
        TargetType::Planet => None,
    }
}
