use std::collections::HashSet;

use orrery_core::{
    CategoryPermission, ChannelId, ChannelKind, ChatPermission, Permission, PermissionSet,
    PermissionState, PermissionsNode, PlanetId, PlanetMember, PlanetPermission, PlanetRole,
    RoleId, RoleName, TargetType, VoicePermission, ROLE_FLAG_BITS,
};
use orrery_protocol::PlanetEvent;
use serde::Deserialize;

use crate::{
    authority::{ensure_can_manage_role, primary_position},
    engine::{has_planet_permission, require_channel_permission},
    errors::EngineError,
    state::EngineState,
};

/// Payload for [`create_role`]. The position is always appended at the
/// bottom of the ladder; use [`reorder_roles`] to move it up afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub is_admin: bool,
    pub chat_perms: PermissionSet,
    pub category_perms: PermissionSet,
    pub voice_perms: PermissionSet,
    pub planet_perms: PermissionSet,
}

/// Partial edit for [`update_role`]; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleEdit {
    pub name: Option<String>,
    pub is_admin: Option<bool>,
    pub chat_perms: Option<PermissionSet>,
    pub category_perms: Option<PermissionSet>,
    pub voice_perms: Option<PermissionSet>,
    pub planet_perms: Option<PermissionSet>,
}

/// Creates a role at the bottom of the planet's ladder, assigning the
/// first free membership flag bit. Only the owner may mint admin roles.
///
/// # Errors
/// Returns [`EngineError::LacksPermission`],
/// [`EngineError::InsufficientAuthority`], [`EngineError::RoleLimitReached`],
/// [`EngineError::InvalidRoleName`], [`EngineError::PlanetNotFound`], or
/// [`EngineError::Store`].
pub async fn create_role(
    state: &EngineState,
    actor: &PlanetMember,
    planet_id: PlanetId,
    new: NewRole,
) -> Result<PlanetRole, EngineError> {
    let name = RoleName::try_from(new.name).map_err(|_| EngineError::InvalidRoleName)?;
    let planet = state
        .store
        .planet(planet_id)
        .await?
        .ok_or(EngineError::PlanetNotFound(planet_id))?;

    if !has_planet_permission(state, actor, PlanetPermission::ManageRoles).await? {
        return Err(EngineError::LacksPermission(Permission::Planet(
            PlanetPermission::ManageRoles,
        )));
    }
    if new.is_admin && planet.owner_user_id != actor.user_id {
        return Err(EngineError::InsufficientAuthority);
    }

    let existing = state.store.planet_roles(planet_id).await?;
    let used: HashSet<u8> = existing.iter().map(|role| role.flag_index).collect();
    let flag_index = (0..ROLE_FLAG_BITS)
        .map(|index| index as u8)
        .find(|index| !used.contains(index))
        .ok_or(EngineError::RoleLimitReached)?;
    let position = existing
        .iter()
        .map(|role| role.position + 1)
        .max()
        .unwrap_or(0);

    let role = PlanetRole {
        id: RoleId(state.store.allocate_id().await?),
        planet_id,
        name,
        position,
        flag_index,
        is_admin: new.is_admin,
        is_default: false,
        chat_perms: new.chat_perms,
        category_perms: new.category_perms,
        voice_perms: new.voice_perms,
        planet_perms: new.planet_perms,
    };
    state.store.insert_role(&role).await?;
    state.role_lists.invalidate_planet(planet_id).await;

    tracing::info!(
        event = "role.created",
        planet_id = %planet_id,
        role_id = %role.id,
        position = role.position,
        flag_index = role.flag_index
    );
    state
        .relay
        .publish(PlanetEvent::RoleUpdated { role: role.clone() })
        .await;
    Ok(role)
}

/// Edits a role's name and masks. Admin promotion or demotion is owner
/// only; the default flag, flag index, planet, and position never change
/// here.
///
/// # Errors
/// Returns [`EngineError::RoleNotFound`], [`EngineError::LacksPermission`],
/// [`EngineError::InsufficientAuthority`], [`EngineError::InvalidRoleName`],
/// or [`EngineError::Store`].
pub async fn update_role(
    state: &EngineState,
    actor: &PlanetMember,
    role_id: RoleId,
    edit: RoleEdit,
) -> Result<PlanetRole, EngineError> {
    let mut role = state
        .store
        .role(role_id)
        .await?
        .ok_or(EngineError::RoleNotFound(role_id))?;
    let planet = state
        .store
        .planet(role.planet_id)
        .await?
        .ok_or(EngineError::PlanetNotFound(role.planet_id))?;

    if !has_planet_permission(state, actor, PlanetPermission::ManageRoles).await? {
        return Err(EngineError::LacksPermission(Permission::Planet(
            PlanetPermission::ManageRoles,
        )));
    }
    ensure_can_manage_role(state, actor, &role).await?;

    if let Some(is_admin) = edit.is_admin {
        if is_admin != role.is_admin && planet.owner_user_id != actor.user_id {
            return Err(EngineError::InsufficientAuthority);
        }
        role.is_admin = is_admin;
    }
    if let Some(name) = edit.name {
        role.name = RoleName::try_from(name).map_err(|_| EngineError::InvalidRoleName)?;
    }
    if let Some(chat_perms) = edit.chat_perms {
        role.chat_perms = chat_perms;
    }
    if let Some(category_perms) = edit.category_perms {
        role.category_perms = category_perms;
    }
    if let Some(voice_perms) = edit.voice_perms {
        role.voice_perms = voice_perms;
    }
    if let Some(planet_perms) = edit.planet_perms {
        role.planet_perms = planet_perms;
    }

    state.store.update_role(&role).await?;
    state.role_lists.invalidate_planet(role.planet_id).await;
    state
        .relay
        .publish(PlanetEvent::RoleUpdated { role: role.clone() })
        .await;
    Ok(role)
}

/// Deletes a role: its nodes go with it, its flag bit is cleared from
/// every member, and remaining positions are compacted back to a dense
/// ladder. The default role is undeletable.
///
/// # Errors
/// Returns [`EngineError::DefaultRoleImmutable`],
/// [`EngineError::RoleNotFound`], [`EngineError::LacksPermission`],
/// [`EngineError::InsufficientAuthority`], or [`EngineError::Store`].
pub async fn delete_role(
    state: &EngineState,
    actor: &PlanetMember,
    role_id: RoleId,
) -> Result<(), EngineError> {
    let role = state
        .store
        .role(role_id)
        .await?
        .ok_or(EngineError::RoleNotFound(role_id))?;
    if role.is_default {
        return Err(EngineError::DefaultRoleImmutable);
    }

    if !has_planet_permission(state, actor, PlanetPermission::ManageRoles).await? {
        return Err(EngineError::LacksPermission(Permission::Planet(
            PlanetPermission::ManageRoles,
        )));
    }
    ensure_can_manage_role(state, actor, &role).await?;

    state.store.delete_nodes_for_role(role_id).await?;
    state
        .store
        .clear_role_flag(role.planet_id, role.flag_index)
        .await?;
    state.store.delete_role(role_id).await?;

    let mut remaining = state.store.planet_roles(role.planet_id).await?;
    remaining.sort_by_key(|role| role.position);
    let compacted: Vec<(RoleId, u32)> = remaining
        .iter()
        .enumerate()
        .map(|(index, role)| (role.id, index as u32))
        .collect();
    state
        .store
        .update_role_positions(role.planet_id, &compacted)
        .await?;
    state.role_lists.invalidate_planet(role.planet_id).await;

    tracing::info!(
        event = "role.deleted",
        planet_id = %role.planet_id,
        role_id = %role_id
    );
    state
        .relay
        .publish(PlanetEvent::RoleDeleted {
            planet_id: role.planet_id,
            role_id,
        })
        .await;
    Ok(())
}

/// Rewrites the planet's role ladder. `ordered` must list every role of
/// the planet exactly once, most authoritative first. Non-owners may only
/// move roles that start and end strictly below their own primary role.
///
/// # Errors
/// Returns [`EngineError::PositionsNotDense`] for an incomplete list,
/// [`EngineError::LacksPermission`], [`EngineError::InsufficientAuthority`],
/// [`EngineError::PlanetNotFound`], or [`EngineError::Store`].
pub async fn reorder_roles(
    state: &EngineState,
    actor: &PlanetMember,
    planet_id: PlanetId,
    ordered: &[RoleId],
) -> Result<(), EngineError> {
    let planet = state
        .store
        .planet(planet_id)
        .await?
        .ok_or(EngineError::PlanetNotFound(planet_id))?;

    if !has_planet_permission(state, actor, PlanetPermission::ManageRoles).await? {
        return Err(EngineError::LacksPermission(Permission::Planet(
            PlanetPermission::ManageRoles,
        )));
    }

    let roles = state.store.planet_roles(planet_id).await?;
    let current: HashSet<RoleId> = roles.iter().map(|role| role.id).collect();
    let requested: HashSet<RoleId> = ordered.iter().copied().collect();
    if ordered.len() != roles.len() || current != requested {
        return Err(EngineError::PositionsNotDense);
    }

    let actor_is_owner = planet.owner_user_id == actor.user_id;
    let actor_position = if actor_is_owner {
        None
    } else {
        match primary_position(state, actor, &planet).await? {
            Some(position) => Some(position),
            None => return Err(EngineError::InsufficientAuthority),
        }
    };

    let mut positions = Vec::with_capacity(ordered.len());
    for (index, role_id) in ordered.iter().enumerate() {
        let new_position = index as u32;
        let role = roles
            .iter()
            .find(|role| role.id == *role_id)
            .ok_or(EngineError::RoleNotFound(*role_id))?;
        if role.position != new_position {
            if let Some(actor_position) = actor_position {
                if role.position <= actor_position || new_position <= actor_position {
                    return Err(EngineError::InsufficientAuthority);
                }
            }
            positions.push((*role_id, new_position));
        }
    }

    state
        .store
        .update_role_positions(planet_id, &positions)
        .await?;
    state.role_lists.invalidate_planet(planet_id).await;
    state
        .relay
        .publish(PlanetEvent::RolesReordered {
            planet_id,
            role_ids: ordered.to_vec(),
        })
        .await;
    Ok(())
}

/// Writes permission bit states into the role's node at one target,
/// creating the node on first write and deleting it when every bit goes
/// back to undefined. Requires ManagePermissions on the channel plus
/// authority over the role.
///
/// # Errors
/// Returns [`EngineError::ChannelNotFound`], [`EngineError::RoleNotFound`],
/// [`EngineError::LacksPermission`], [`EngineError::InsufficientAuthority`],
/// or [`EngineError::Store`].
pub async fn set_permission_node(
    state: &EngineState,
    actor: &PlanetMember,
    role_id: RoleId,
    target_id: ChannelId,
    target_type: TargetType,
    states: &[(Permission, PermissionState)],
) -> Result<PermissionsNode, EngineError> {
    let channel = state
        .store
        .channel(target_id)
        .await?
        .ok_or(EngineError::ChannelNotFound(target_id))?;
    let role = state
        .store
        .role(role_id)
        .await?
        .filter(|role| role.planet_id == channel.planet_id)
        .ok_or(EngineError::RoleNotFound(role_id))?;

    require_channel_permission(state, actor, &channel, manage_permissions_for(channel.kind))
        .await?;
    ensure_can_manage_role(state, actor, &role).await?;

    let mut node = state
        .store
        .node(role_id, target_id, target_type)
        .await?
        .unwrap_or_else(|| PermissionsNode::empty(role_id, target_id, target_type));
    for (permission, permission_state) in states {
        node = node.with_state(*permission, *permission_state);
    }

    if node.is_vacant() {
        state
            .store
            .delete_node(role_id, target_id, target_type)
            .await?;
    } else {
        state.store.upsert_node(&node).await?;
    }

    state
        .relay
        .publish(PlanetEvent::NodeUpdated {
            planet_id: channel.planet_id,
            node,
        })
        .await;
    Ok(node)
}

/// Deletes the role's node at one target outright.
///
/// # Errors
/// Returns [`EngineError::NodeNotFound`] when no node exists, plus the
/// same gate errors as [`set_permission_node`].
pub async fn clear_permission_node(
    state: &EngineState,
    actor: &PlanetMember,
    role_id: RoleId,
    target_id: ChannelId,
    target_type: TargetType,
) -> Result<(), EngineError> {
    let channel = state
        .store
        .channel(target_id)
        .await?
        .ok_or(EngineError::ChannelNotFound(target_id))?;
    let role = state
        .store
        .role(role_id)
        .await?
        .filter(|role| role.planet_id == channel.planet_id)
        .ok_or(EngineError::RoleNotFound(role_id))?;

    require_channel_permission(state, actor, &channel, manage_permissions_for(channel.kind))
        .await?;
    ensure_can_manage_role(state, actor, &role).await?;

    if state
        .store
        .node(role_id, target_id, target_type)
        .await?
        .is_none()
    {
        return Err(EngineError::NodeNotFound { role_id, target_id });
    }
    state
        .store
        .delete_node(role_id, target_id, target_type)
        .await?;

    state
        .relay
        .publish(PlanetEvent::NodeDeleted {
            planet_id: channel.planet_id,
            role_id,
            target_id,
            target_type,
        })
        .await;
    Ok(())
}

const fn manage_permissions_for(kind: ChannelKind) -> Permission {
    match kind {
        ChannelKind::Chat => Permission::Chat(ChatPermission::ManagePermissions),
        ChannelKind::Category => Permission::Category(CategoryPermission::ManagePermissions),
        ChannelKind::Voice => Permission::Voice(VoicePermission::ManagePermissions),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use orrery_core::{
        default_category_permissions, default_chat_permissions, default_planet_permissions,
        default_voice_permissions, PermissionSet, Planet, PlanetId, PlanetRole, RoleId, RoleName,
        UserId,
    };

    use super::{create_role, delete_role, reorder_roles, NewRole};
    use crate::{
        config::EngineConfig,
        errors::EngineError,
        members::{grant_role, join_planet},
        relay::NullRelay,
        state::EngineState,
        store::{memory::MemoryStore, PermissionStore},
    };

    fn new_role(name: &str) -> NewRole {
        NewRole {
            name: String::from(name),
            is_admin: false,
            chat_perms: default_chat_permissions(),
            category_perms: default_category_permissions(),
            voice_perms: default_voice_permissions(),
            planet_perms: PermissionSet::empty(),
        }
    }

    async fn seeded_state() -> (EngineState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_planet(Planet {
                id: PlanetId(1),
                owner_user_id: UserId(100),
                default_role_id: RoleId(10),
            })
            .await;
        store
            .insert_role(&PlanetRole {
                id: RoleId(10),
                planet_id: PlanetId(1),
                name: RoleName::try_from(String::from("citizen"))
                    .expect("role name should validate"),
                position: 0,
                flag_index: 0,
                is_admin: false,
                is_default: true,
                chat_perms: default_chat_permissions(),
                category_perms: default_category_permissions(),
                voice_perms: default_voice_permissions(),
                planet_perms: default_planet_permissions(),
            })
            .await
            .expect("seed default role");

        let state = EngineState::new(
            Arc::clone(&store) as Arc<dyn PermissionStore>,
            Arc::new(NullRelay),
            EngineConfig::default(),
        );
        (state, store)
    }

    #[tokio::test]
    async fn create_assigns_free_flag_and_bottom_position() {
        let (state, _store) = seeded_state().await;
        let owner = join_planet(&state, PlanetId(1), UserId(100), String::from("Owner"))
            .await
            .expect("owner join should succeed");

        let first = create_role(&state, &owner, PlanetId(1), new_role("navigators"))
            .await
            .expect("create should succeed");
        let second = create_role(&state, &owner, PlanetId(1), new_role("cartographers"))
            .await
            .expect("create should succeed");

        assert_eq!(first.flag_index, 1);
        assert_eq!(second.flag_index, 2);
        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
    }

    #[tokio::test]
    async fn create_without_manage_roles_is_denied_by_name() {
        let (state, _store) = seeded_state().await;
        let member = join_planet(&state, PlanetId(1), UserId(7), String::from("Kep"))
            .await
            .expect("join should succeed");

        let error = create_role(&state, &member, PlanetId(1), new_role("navigators"))
            .await
            .expect_err("create should be denied");
        assert_eq!(error.to_string(), "missing permission planet.manage_roles");
    }

    #[tokio::test]
    async fn delete_clears_member_bits_and_compacts_positions() {
        let (state, store) = seeded_state().await;
        let owner = join_planet(&state, PlanetId(1), UserId(100), String::from("Owner"))
            .await
            .expect("owner join should succeed");
        let member = join_planet(&state, PlanetId(1), UserId(7), String::from("Kep"))
            .await
            .expect("join should succeed");

        let doomed = create_role(&state, &owner, PlanetId(1), new_role("navigators"))
            .await
            .expect("create should succeed");
        let survivor = create_role(&state, &owner, PlanetId(1), new_role("cartographers"))
            .await
            .expect("create should succeed");
        grant_role(&state, &owner, member.id, doomed.id)
            .await
            .expect("grant should succeed");

        delete_role(&state, &owner, doomed.id)
            .await
            .expect("delete should succeed");

        let member = store
            .member(member.id)
            .await
            .expect("member fetch")
            .expect("member row");
        assert!(!member.membership.contains(doomed.flag_index));

        let survivor = store
            .role(survivor.id)
            .await
            .expect("role fetch")
            .expect("role row");
        assert_eq!(survivor.position, 1);
    }

    #[tokio::test]
    async fn reorder_rejects_partial_role_lists() {
        let (state, _store) = seeded_state().await;
        let owner = join_planet(&state, PlanetId(1), UserId(100), String::from("Owner"))
            .await
            .expect("owner join should succeed");
        let role = create_role(&state, &owner, PlanetId(1), new_role("navigators"))
            .await
            .expect("create should succeed");

        let error = reorder_roles(&state, &owner, PlanetId(1), &[role.id])
            .await
            .expect_err("partial reorder should fail");
        assert!(matches!(error, EngineError::PositionsNotDense));
    }

    #[tokio::test]
    async fn reorder_moves_roles_for_the_owner() {
        let (state, store) = seeded_state().await;
        let owner = join_planet(&state, PlanetId(1), UserId(100), String::from("Owner"))
            .await
            .expect("owner join should succeed");
        let first = create_role(&state, &owner, PlanetId(1), new_role("navigators"))
            .await
            .expect("create should succeed");
        let second = create_role(&state, &owner, PlanetId(1), new_role("cartographers"))
            .await
            .expect("create should succeed");

        reorder_roles(
            &state,
            &owner,
            PlanetId(1),
            &[second.id, first.id, RoleId(10)],
        )
        .await
        .expect("reorder should succeed");

        let moved = store
            .role(second.id)
            .await
            .expect("role fetch")
            .expect("role row");
        assert_eq!(moved.position, 0);
        let default_role = store
            .role(RoleId(10))
            .await
            .expect("role fetch")
            .expect("role row");
        assert_eq!(default_role.position, 2);
    }
}
