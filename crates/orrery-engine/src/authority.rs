use orrery_core::{role_authority, Planet, PlanetMember, PlanetRole, OWNER_AUTHORITY};

use crate::{
    errors::EngineError,
    resolver::roles_ordered,
    state::EngineState,
    store::{with_timeout, StoreError},
};

/// The member's derived authority. The planet owner gets the maximal
/// sentinel; everyone else derives from their primary (most
/// authoritative) role position.
///
/// # Errors
/// Returns [`EngineError::PlanetNotFound`] for an orphaned member and
/// [`EngineError::Store`] on backing-store failure.
pub async fn authority_of(state: &EngineState, member: &PlanetMember) -> Result<i64, EngineError> {
    let limit = state.config.store_timeout;
    let planet = with_timeout(limit, state.store.planet(member.planet_id))
        .await?
        .ok_or(EngineError::PlanetNotFound(member.planet_id))?;

    if planet.owner_user_id == member.user_id {
        return Ok(OWNER_AUTHORITY);
    }

    match primary_position(state, member, &planet).await? {
        Some(position) => Ok(role_authority(position)),
        None => Ok(i64::MIN),
    }
}

/// May the actor create, edit, delete, assign, or revoke this role? True
/// for the owner; otherwise the role must sit strictly below the actor's
/// primary role.
///
/// # Errors
/// Returns [`EngineError::Store`] on backing-store failure.
pub async fn can_manage_role(
    state: &EngineState,
    actor: &PlanetMember,
    role: &PlanetRole,
) -> Result<bool, EngineError> {
    if actor.planet_id != role.planet_id || actor.is_deleted {
        return Ok(false);
    }

    let limit = state.config.store_timeout;
    let Some(planet) = with_timeout(limit, state.store.planet(actor.planet_id)).await? else {
        return Ok(false);
    };
    if planet.owner_user_id == actor.user_id {
        return Ok(true);
    }

    match primary_position(state, actor, &planet).await? {
        Some(position) => Ok(orrery_core::can_manage_role(false, position, role.position)),
        None => Ok(false),
    }
}

/// May the actor act on (kick, moderate, edit) the target member?
/// Requires strictly greater authority, so equals never act on each
/// other and nobody acts on the owner.
///
/// # Errors
/// Returns [`EngineError::Store`] on backing-store failure.
pub async fn can_act_on_member(
    state: &EngineState,
    actor: &PlanetMember,
    target: &PlanetMember,
) -> Result<bool, EngineError> {
    if actor.planet_id != target.planet_id || actor.is_deleted {
        return Ok(false);
    }
    let actor_authority = authority_of(state, actor).await?;
    let target_authority = authority_of(state, target).await?;
    Ok(orrery_core::can_act_on(actor_authority, target_authority))
}

pub(crate) async fn ensure_can_manage_role(
    state: &EngineState,
    actor: &PlanetMember,
    role: &PlanetRole,
) -> Result<(), EngineError> {
    if can_manage_role(state, actor, role).await? {
        Ok(())
    } else {
        Err(EngineError::InsufficientAuthority)
    }
}

/// Position of the member's most authoritative role, falling back to the
/// planet default role for an empty membership. `None` only when the
/// default role row is missing, which is logged as an integrity fault.
pub(crate) async fn primary_position(
    state: &EngineState,
    member: &PlanetMember,
    planet: &Planet,
) -> Result<Option<u32>, StoreError> {
    let roles = roles_ordered(state, member).await?;
    if let Some(top) = roles.first() {
        return Ok(Some(top.position));
    }

    let limit = state.config.store_timeout;
    let default_role = with_timeout(limit, state.store.role(planet.default_role_id)).await?;
    match default_role {
        Some(role) => Ok(Some(role.position)),
        None => {
            tracing::error!(
                event = "permissions.default_role.missing",
                planet_id = %planet.id,
                role_id = %planet.default_role_id
            );
            Ok(None)
        }
    }
}
