use orrery_core::{
    MemberId, MemberNickname, Permission, PlanetId, PlanetMember, PlanetPermission, RoleId,
    RoleMembership, UserId,
};
use orrery_protocol::PlanetEvent;

use crate::{
    authority::{can_act_on_member, ensure_can_manage_role},
    errors::EngineError,
    state::EngineState,
};

/// Adds the user to the planet. A soft-deleted membership is restored in
/// place, so a rejoin keeps the original member id; a live membership is
/// rejected. New and restored members hold exactly the default role.
///
/// # Errors
/// Returns [`EngineError::AlreadyMember`] for a live duplicate,
/// [`EngineError::PlanetNotFound`] / [`EngineError::RoleNotFound`] for
/// missing rows, [`EngineError::InvalidNickname`] for a bad nickname, and
/// [`EngineError::Store`] on backing-store failure.
pub async fn join_planet(
    state: &EngineState,
    planet_id: PlanetId,
    user_id: UserId,
    nickname: String,
) -> Result<PlanetMember, EngineError> {
    let nickname =
        MemberNickname::try_from(nickname).map_err(|_| EngineError::InvalidNickname)?;

    let planet = state
        .store
        .planet(planet_id)
        .await?
        .ok_or(EngineError::PlanetNotFound(planet_id))?;
    let default_role = state
        .store
        .role(planet.default_role_id)
        .await?
        .ok_or_else(|| {
            tracing::error!(
                event = "permissions.default_role.missing",
                planet_id = %planet_id,
                role_id = %planet.default_role_id
            );
            EngineError::RoleNotFound(planet.default_role_id)
        })?;

    let membership = RoleMembership::empty().with(default_role.flag_index);
    let member = match state.store.member_by_user_any(user_id, planet_id).await? {
        Some(existing) if !existing.is_deleted => return Err(EngineError::AlreadyMember),
        Some(mut deleted) => {
            deleted.is_deleted = false;
            deleted.nickname = nickname;
            deleted.membership = membership;
            state.store.update_member(&deleted).await?;
            deleted
        }
        None => {
            let member = PlanetMember {
                id: MemberId(state.store.allocate_id().await?),
                user_id,
                planet_id,
                nickname,
                is_deleted: false,
                membership,
            };
            state.store.insert_member(&member).await?;
            member
        }
    };

    tracing::info!(
        event = "member.joined",
        planet_id = %planet_id,
        user_id = %user_id,
        member_id = %member.id
    );
    state
        .relay
        .publish(PlanetEvent::MemberUpdated {
            member: member.clone(),
        })
        .await;
    Ok(member)
}

/// Renames a member. Members rename themselves freely; renaming someone
/// else requires planet Manage plus strictly greater authority.
///
/// # Errors
/// Returns [`EngineError::MemberNotFound`], [`EngineError::InvalidNickname`],
/// [`EngineError::LacksPermission`], [`EngineError::InsufficientAuthority`],
/// or [`EngineError::Store`].
pub async fn update_nickname(
    state: &EngineState,
    actor: &PlanetMember,
    member_id: MemberId,
    nickname: String,
) -> Result<PlanetMember, EngineError> {
    let nickname =
        MemberNickname::try_from(nickname).map_err(|_| EngineError::InvalidNickname)?;
    let mut member = state
        .store
        .member(member_id)
        .await?
        .ok_or(EngineError::MemberNotFound(member_id))?;

    if actor.id != member.id {
        if !crate::engine::has_planet_permission(state, actor, PlanetPermission::Manage).await? {
            return Err(EngineError::LacksPermission(Permission::Planet(
                PlanetPermission::Manage,
            )));
        }
        if !can_act_on_member(state, actor, &member).await? {
            return Err(EngineError::InsufficientAuthority);
        }
    }

    member.nickname = nickname;
    state.store.update_member(&member).await?;
    state
        .relay
        .publish(PlanetEvent::MemberUpdated {
            member: member.clone(),
        })
        .await;
    Ok(member)
}

/// Grants a role to a member. The actor must outrank the role.
///
/// # Errors
/// Returns [`EngineError::MemberNotFound`] / [`EngineError::RoleNotFound`],
/// [`EngineError::RoleAlreadyHeld`], [`EngineError::InsufficientAuthority`],
/// or [`EngineError::Store`].
pub async fn grant_role(
    state: &EngineState,
    actor: &PlanetMember,
    member_id: MemberId,
    role_id: RoleId,
) -> Result<PlanetMember, EngineError> {
    let mut member = state
        .store
        .member(member_id)
        .await?
        .ok_or(EngineError::MemberNotFound(member_id))?;
    let role = state
        .store
        .role(role_id)
        .await?
        .filter(|role| role.planet_id == member.planet_id)
        .ok_or(EngineError::RoleNotFound(role_id))?;

    ensure_can_manage_role(state, actor, &role).await?;

    if member.membership.contains(role.flag_index) {
        return Err(EngineError::RoleAlreadyHeld(role_id));
    }
    member.membership = member.membership.with(role.flag_index);
    state.store.update_member(&member).await?;

    tracing::info!(
        event = "member.role_granted",
        member_id = %member.id,
        role_id = %role_id
    );
    state
        .relay
        .publish(PlanetEvent::MemberUpdated {
            member: member.clone(),
        })
        .await;
    Ok(member)
}

/// Revokes a role from a member. The default role is irrevocable.
///
/// # Errors
/// Returns [`EngineError::DefaultRoleImmutable`], [`EngineError::RoleNotHeld`],
/// [`EngineError::MemberNotFound`] / [`EngineError::RoleNotFound`],
/// [`EngineError::InsufficientAuthority`], or [`EngineError::Store`].
pub async fn revoke_role(
    state: &EngineState,
    actor: &PlanetMember,
    member_id: MemberId,
    role_id: RoleId,
) -> Result<PlanetMember, EngineError> {
    let mut member = state
        .store
        .member(member_id)
        .await?
        .ok_or(EngineError::MemberNotFound(member_id))?;
    let role = state
        .store
        .role(role_id)
        .await?
        .filter(|role| role.planet_id == member.planet_id)
        .ok_or(EngineError::RoleNotFound(role_id))?;

    if role.is_default {
        return Err(EngineError::DefaultRoleImmutable);
    }
    ensure_can_manage_role(state, actor, &role).await?;

    if !member.membership.contains(role.flag_index) {
        return Err(EngineError::RoleNotHeld(role_id));
    }
    member.membership = member.membership.without(role.flag_index);
    state.store.update_member(&member).await?;

    tracing::info!(
        event = "member.role_revoked",
        member_id = %member.id,
        role_id = %role_id
    );
    state
        .relay
        .publish(PlanetEvent::MemberUpdated {
            member: member.clone(),
        })
        .await;
    Ok(member)
}

/// Soft-deletes the membership and drops its id-cache entry, so later
/// lookups for the same (user, planet) go back to the store. Idempotent.
///
/// # Errors
/// Returns [`EngineError::MemberNotFound`] or [`EngineError::Store`].
pub async fn leave_planet(state: &EngineState, member_id: MemberId) -> Result<(), EngineError> {
    let mut member = state
        .store
        .member(member_id)
        .await?
        .ok_or(EngineError::MemberNotFound(member_id))?;
    if member.is_deleted {
        return Ok(());
    }

    member.is_deleted = true;
    member.membership = RoleMembership::empty();
    state.store.update_member(&member).await?;
    state
        .member_ids
        .invalidate(member.user_id, member.planet_id)
        .await;

    tracing::info!(
        event = "member.left",
        planet_id = %member.planet_id,
        member_id = %member.id
    );
    state
        .relay
        .publish(PlanetEvent::MemberDeleted {
            planet_id: member.planet_id,
            member_id: member.id,
        })
        .await;
    Ok(())
}

/// Removes another member: planet Kick plus strictly greater authority,
/// then the same soft delete as [`leave_planet`].
///
/// # Errors
/// Returns [`EngineError::LacksPermission`],
/// [`EngineError::InsufficientAuthority`], [`EngineError::MemberNotFound`],
/// or [`EngineError::Store`].
pub async fn kick_member(
    state: &EngineState,
    actor: &PlanetMember,
    member_id: MemberId,
) -> Result<(), EngineError> {
    let target = state
        .store
        .member(member_id)
        .await?
        .ok_or(EngineError::MemberNotFound(member_id))?;

    if !crate::engine::has_planet_permission(state, actor, PlanetPermission::Kick).await? {
        return Err(EngineError::LacksPermission(Permission::Planet(
            PlanetPermission::Kick,
        )));
    }
    if !can_act_on_member(state, actor, &target).await? {
        return Err(EngineError::InsufficientAuthority);
    }

    leave_planet(state, member_id).await
}
