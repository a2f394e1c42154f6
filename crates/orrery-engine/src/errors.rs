use orrery_core::{ChannelId, MemberId, Permission, PlanetId, RoleId};

use crate::store::StoreError;

/// Failures surfaced by the engine's services. Permission denial on the
/// boolean check path is a normal `Ok(false)`, never an error; these
/// variants cover mutations and genuine backing-store faults.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("planet {0} not found")]
    PlanetNotFound(PlanetId),
    #[error("channel {0} not found")]
    ChannelNotFound(ChannelId),
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
    #[error("role {0} not found")]
    RoleNotFound(RoleId),
    #[error("no permission node exists for role {role_id} at target {target_id}")]
    NodeNotFound {
        role_id: RoleId,
        target_id: ChannelId,
    },
    #[error("user is already a member of this planet")]
    AlreadyMember,
    #[error("member already holds role {0}")]
    RoleAlreadyHeld(RoleId),
    #[error("member does not hold role {0}")]
    RoleNotHeld(RoleId),
    #[error("planet role limit reached")]
    RoleLimitReached,
    #[error("the default role cannot be removed or deleted")]
    DefaultRoleImmutable,
    #[error("missing permission {0}")]
    LacksPermission(Permission),
    #[error("authority is insufficient for this action")]
    InsufficientAuthority,
    #[error("invalid nickname")]
    InvalidNickname,
    #[error("invalid role name")]
    InvalidRoleName,
    #[error("reorder must cover every role of the planet exactly once")]
    PositionsNotDense,
    #[error("staging queue is full")]
    StagingQueueFull,
    #[error("staging worker is not running")]
    StagingUnavailable,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
