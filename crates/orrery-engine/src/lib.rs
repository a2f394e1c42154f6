#![forbid(unsafe_code)]

pub(crate) mod authority;
pub(crate) mod cache;
pub(crate) mod config;
pub(crate) mod engine;
pub(crate) mod errors;
pub(crate) mod members;
pub(crate) mod relay;
pub(crate) mod resolver;
pub(crate) mod roles;
pub(crate) mod staging;
pub(crate) mod state;
pub(crate) mod store;

pub use authority::{authority_of, can_act_on_member, can_manage_role};
pub use config::{
    EngineConfig, DEFAULT_MAX_INHERITANCE_DEPTH, DEFAULT_ROLE_CACHE_CAPACITY,
    DEFAULT_STAGING_BATCH_LIMIT, DEFAULT_STAGING_FLUSH_INTERVAL_MILLIS,
    DEFAULT_STAGING_QUEUE_CAPACITY, DEFAULT_STORE_TIMEOUT_MILLIS,
};
pub use engine::{has_channel_permission, has_planet_permission, require_channel_permission};
pub use errors::{init_tracing, EngineError};
pub use members::{
    grant_role, join_planet, kick_member, leave_planet, revoke_role, update_nickname,
};
pub use relay::{BufferedRelay, NullRelay, RelayNotifier};
pub use resolver::{member_by_user, roles_ordered, roles_with_nodes, RoleAndNode};
pub use roles::{
    clear_permission_node, create_role, delete_role, reorder_roles, set_permission_node,
    update_role, NewRole, RoleEdit,
};
pub use staging::{MessageDraft, MessageStaging};
pub use state::EngineState;
pub use store::{memory::MemoryStore, postgres::PgStore, MessageSink, PermissionStore, StoreError};
