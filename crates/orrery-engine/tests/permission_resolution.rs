#![allow(clippy::too_many_lines)]

use std::sync::Arc;

use orrery_core::{
    default_category_permissions, default_chat_permissions, default_planet_permissions,
    default_voice_permissions, Channel, ChannelId, ChannelKind, ChatPermission, MemberId,
    MemberNickname, Permission, PermissionState, PermissionsNode, Planet, PlanetId, PlanetMember,
    PlanetPermission, PlanetRole, RoleId, RoleMembership, RoleName, TargetType, UserId,
    OWNER_AUTHORITY,
};
use orrery_engine::{
    authority_of, can_manage_role, has_channel_permission, has_planet_permission, leave_planet,
    member_by_user, require_channel_permission, EngineConfig, EngineError, EngineState,
    MemoryStore, NullRelay, PermissionStore,
};

const PLANET: PlanetId = PlanetId(1);
const OWNER_USER: UserId = UserId(100);
const DEFAULT_ROLE: RoleId = RoleId(10);
const CATEGORY: ChannelId = ChannelId(30);
const CHANNEL: ChannelId = ChannelId(40);

fn nickname(value: &str) -> MemberNickname {
    MemberNickname::try_from(String::from(value)).expect("nickname should validate")
}

fn role_name(value: &str) -> RoleName {
    RoleName::try_from(String::from(value)).expect("role name should validate")
}

fn base_role(id: i64, position: u32, flag_index: u8) -> PlanetRole {
    PlanetRole {
        id: RoleId(id),
        planet_id: PLANET,
        name: role_name(&format!("role-{id}")),
        position,
        flag_index,
        is_admin: false,
        is_default: false,
        chat_perms: default_chat_permissions(),
        category_perms: default_category_permissions(),
        voice_perms: default_voice_permissions(),
        planet_perms: default_planet_permissions(),
    }
}

fn member_with(id: i64, user: i64, membership: RoleMembership) -> PlanetMember {
    PlanetMember {
        id: MemberId(id),
        user_id: UserId(user),
        planet_id: PLANET,
        nickname: nickname("pilot"),
        is_deleted: false,
        membership,
    }
}

/// Planet 1 owned by user 100, default role 10 at position 10 and flag 0,
/// category 30, chat channel 40 inside it (not inheriting).
async fn scenario() -> (EngineState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_planet(Planet {
            id: PLANET,
            owner_user_id: OWNER_USER,
            default_role_id: DEFAULT_ROLE,
        })
        .await;
    let mut default_role = base_role(DEFAULT_ROLE.0, 10, 0);
    default_role.is_default = true;
    default_role.name = role_name("citizen");
    store.insert_role(&default_role).await.expect("seed default role");
    store
        .insert_channel(Channel {
            id: CATEGORY,
            planet_id: PLANET,
            kind: ChannelKind::Category,
            parent_id: None,
            inherits_perms: false,
        })
        .await;
    store
        .insert_channel(Channel {
            id: CHANNEL,
            planet_id: PLANET,
            kind: ChannelKind::Chat,
            parent_id: Some(CATEGORY),
            inherits_perms: false,
        })
        .await;

    let state = EngineState::new(
        Arc::clone(&store) as Arc<dyn PermissionStore>,
        Arc::new(NullRelay),
        EngineConfig::default(),
    );
    (state, store)
}

async fn channel(store: &MemoryStore, id: ChannelId) -> Channel {
    store
        .channel(id)
        .await
        .expect("channel fetch should succeed")
        .expect("channel should exist")
}

#[tokio::test]
async fn owner_holds_every_permission_on_every_target() {
    let (state, store) = scenario().await;
    let owner = member_with(1, OWNER_USER.0, RoleMembership::empty().with(0));
    store.insert_member(&owner).await.expect("seed owner");

    let chat = channel(&store, CHANNEL).await;
    let category = channel(&store, CATEGORY).await;

    for permission in [
        Permission::Chat(ChatPermission::View),
        Permission::Chat(ChatPermission::ManageChannel),
        Permission::Chat(ChatPermission::ManageMessages),
    ] {
        assert!(has_channel_permission(&state, &owner, &chat, permission)
            .await
            .expect("check should resolve"));
    }
    assert!(has_channel_permission(
        &state,
        &owner,
        &category,
        Permission::Category(orrery_core::CategoryPermission::ManagePermissions)
    )
    .await
    .expect("check should resolve"));
    assert!(has_planet_permission(&state, &owner, PlanetPermission::Ban)
        .await
        .expect("check should resolve"));
    assert_eq!(
        authority_of(&state, &owner).await.expect("authority should resolve"),
        OWNER_AUTHORITY
    );
}

#[tokio::test]
async fn admin_role_bypasses_explicit_denies() {
    let (state, store) = scenario().await;
    let mut admin_role = base_role(11, 3, 1);
    admin_role.is_admin = true;
    store.insert_role(&admin_role).await.expect("seed admin role");

    let deny_everything = PermissionsNode {
        role_id: DEFAULT_ROLE,
        target_id: CHANNEL,
        target_type: TargetType::ChatChannel,
        code: 0,
        mask: u64::MAX,
    };
    store.upsert_node(&deny_everything).await.expect("seed node");

    let admin = member_with(2, 7, RoleMembership::empty().with(0).with(1));
    store.insert_member(&admin).await.expect("seed member");

    let chat = channel(&store, CHANNEL).await;
    assert!(has_channel_permission(
        &state,
        &admin,
        &chat,
        Permission::Chat(ChatPermission::ManageMessages)
    )
    .await
    .expect("check should resolve"));
}

#[tokio::test]
async fn explicit_deny_at_higher_authority_wins_over_allow_below() {
    let (state, store) = scenario().await;
    let senior = base_role(11, 2, 1);
    let junior = base_role(12, 4, 2);
    store.insert_role(&senior).await.expect("seed role");
    store.insert_role(&junior).await.expect("seed role");

    let deny = PermissionsNode::empty(senior.id, CHANNEL, TargetType::ChatChannel).with_state(
        Permission::Chat(ChatPermission::PostMessages),
        PermissionState::Deny,
    );
    let allow = PermissionsNode::empty(junior.id, CHANNEL, TargetType::ChatChannel).with_state(
        Permission::Chat(ChatPermission::PostMessages),
        PermissionState::Allow,
    );
    store.upsert_node(&deny).await.expect("seed node");
    store.upsert_node(&allow).await.expect("seed node");

    let member = member_with(2, 7, RoleMembership::empty().with(0).with(1).with(2));
    store.insert_member(&member).await.expect("seed member");

    let chat = channel(&store, CHANNEL).await;
    assert!(!has_channel_permission(
        &state,
        &member,
        &chat,
        Permission::Chat(ChatPermission::PostMessages)
    )
    .await
    .expect("check should resolve"));

    let error = require_channel_permission(
        &state,
        &member,
        &chat,
        Permission::Chat(ChatPermission::PostMessages),
    )
    .await
    .expect_err("denial should surface as a typed error");
    assert!(matches!(
        error,
        EngineError::LacksPermission(Permission::Chat(ChatPermission::PostMessages))
    ));
}

#[tokio::test]
async fn fallback_uses_the_most_authoritative_held_roles_defaults() {
    let (state, store) = scenario().await;
    let mut muted = base_role(11, 2, 1);
    muted.chat_perms = {
        let mut set = default_chat_permissions();
        set.remove(Permission::Chat(ChatPermission::PostMessages));
        set
    };
    store.insert_role(&muted).await.expect("seed role");

    let member = member_with(2, 7, RoleMembership::empty().with(0).with(1));
    store.insert_member(&member).await.expect("seed member");

    let chat = channel(&store, CHANNEL).await;
    assert!(!has_channel_permission(
        &state,
        &member,
        &chat,
        Permission::Chat(ChatPermission::PostMessages)
    )
    .await
    .expect("check should resolve"));
    assert!(has_channel_permission(
        &state,
        &member,
        &chat,
        Permission::Chat(ChatPermission::View)
    )
    .await
    .expect("check should resolve"));
}

#[tokio::test]
async fn memberless_planets_fall_back_to_the_default_role_mask() {
    let (state, store) = scenario().await;
    let member = member_with(2, 7, RoleMembership::empty());
    store.insert_member(&member).await.expect("seed member");

    let chat = channel(&store, CHANNEL).await;
    assert!(has_channel_permission(
        &state,
        &member,
        &chat,
        Permission::Chat(ChatPermission::PostMessages)
    )
    .await
    .expect("check should resolve"));
    assert!(!has_channel_permission(
        &state,
        &member,
        &chat,
        Permission::Chat(ChatPermission::ManageChannel)
    )
    .await
    .expect("check should resolve"));
}

#[tokio::test]
async fn view_deny_gates_every_other_permission() {
    let (state, store) = scenario().await;
    let watcher = base_role(11, 5, 1);
    store.insert_role(&watcher).await.expect("seed role");

    let hide = PermissionsNode::empty(watcher.id, CHANNEL, TargetType::ChatChannel).with_state(
        Permission::Chat(ChatPermission::View),
        PermissionState::Deny,
    );
    let allow_posts =
        PermissionsNode::empty(DEFAULT_ROLE, CHANNEL, TargetType::ChatChannel).with_state(
            Permission::Chat(ChatPermission::PostMessages),
            PermissionState::Allow,
        );
    store.upsert_node(&hide).await.expect("seed node");
    store.upsert_node(&allow_posts).await.expect("seed node");

    let hidden = member_with(2, 7, RoleMembership::empty().with(0).with(1));
    store.insert_member(&hidden).await.expect("seed member");
    let visible = member_with(3, 8, RoleMembership::empty().with(0));
    store.insert_member(&visible).await.expect("seed member");

    let chat = channel(&store, CHANNEL).await;
    for permission in [
        Permission::Chat(ChatPermission::View),
        Permission::Chat(ChatPermission::PostMessages),
        Permission::Chat(ChatPermission::Embed),
        Permission::Chat(ChatPermission::AttachContent),
    ] {
        assert!(
            !has_channel_permission(&state, &hidden, &chat, permission)
                .await
                .expect("check should resolve"),
            "hidden member must not hold {permission}"
        );
    }

    // The same channel stays fully usable for a member without the
    // denying role, falling back to the default role's mask.
    assert!(has_channel_permission(
        &state,
        &visible,
        &chat,
        Permission::Chat(ChatPermission::PostMessages)
    )
    .await
    .expect("check should resolve"));
}

#[tokio::test]
async fn view_definition_from_a_lower_role_is_honored_when_higher_roles_are_silent() {
    let (state, store) = scenario().await;
    let senior = base_role(11, 2, 1);
    let junior = base_role(12, 4, 2);
    store.insert_role(&senior).await.expect("seed role");
    store.insert_role(&junior).await.expect("seed role");

    let lower_allow = PermissionsNode::empty(junior.id, CHANNEL, TargetType::ChatChannel)
        .with_state(Permission::Chat(ChatPermission::View), PermissionState::Allow);
    store.upsert_node(&lower_allow).await.expect("seed node");

    let member = member_with(2, 7, RoleMembership::empty().with(0).with(1).with(2));
    store.insert_member(&member).await.expect("seed member");

    let chat = channel(&store, CHANNEL).await;
    assert!(has_channel_permission(
        &state,
        &member,
        &chat,
        Permission::Chat(ChatPermission::View)
    )
    .await
    .expect("check should resolve"));
}

#[tokio::test]
async fn inheriting_channel_evaluates_exactly_like_its_category() {
    let (state, store) = scenario().await;
    store
        .insert_channel(Channel {
            id: ChannelId(41),
            planet_id: PLANET,
            kind: ChannelKind::Chat,
            parent_id: Some(CATEGORY),
            inherits_perms: true,
        })
        .await;

    // Chat-category node attached to the category row: inheriting
    // channels resolve against it.
    let deny_posts =
        PermissionsNode::empty(DEFAULT_ROLE, CATEGORY, TargetType::ChatChannel).with_state(
            Permission::Chat(ChatPermission::PostMessages),
            PermissionState::Deny,
        );
    store.upsert_node(&deny_posts).await.expect("seed node");

    let member = member_with(2, 7, RoleMembership::empty().with(0));
    store.insert_member(&member).await.expect("seed member");

    let inheriting = channel(&store, ChannelId(41)).await;
    let category = channel(&store, CATEGORY).await;
    let standalone = channel(&store, CHANNEL).await;

    for permission in [
        Permission::Chat(ChatPermission::View),
        Permission::Chat(ChatPermission::PostMessages),
        Permission::Chat(ChatPermission::Embed),
    ] {
        let at_category = has_channel_permission(&state, &member, &category, permission)
            .await
            .expect("check should resolve");
        let at_inheriting = has_channel_permission(&state, &member, &inheriting, permission)
            .await
            .expect("check should resolve");
        assert_eq!(at_category, at_inheriting, "divergence for {permission}");
    }

    // The sibling that does not inherit keeps its own (node-free) result.
    assert!(has_channel_permission(
        &state,
        &member,
        &standalone,
        Permission::Chat(ChatPermission::PostMessages)
    )
    .await
    .expect("check should resolve"));
    assert!(!has_channel_permission(
        &state,
        &member,
        &inheriting,
        Permission::Chat(ChatPermission::PostMessages)
    )
    .await
    .expect("check should resolve"));
}

#[tokio::test]
async fn broken_inheritance_chain_stops_at_the_last_reachable_node() {
    let (state, store) = scenario().await;
    store
        .insert_channel(Channel {
            id: ChannelId(42),
            planet_id: PLANET,
            kind: ChannelKind::Chat,
            parent_id: Some(ChannelId(999)),
            inherits_perms: true,
        })
        .await;

    let deny_here = PermissionsNode::empty(DEFAULT_ROLE, ChannelId(42), TargetType::ChatChannel)
        .with_state(
            Permission::Chat(ChatPermission::PostMessages),
            PermissionState::Deny,
        );
    store.upsert_node(&deny_here).await.expect("seed node");

    let member = member_with(2, 7, RoleMembership::empty().with(0));
    store.insert_member(&member).await.expect("seed member");

    let orphan = channel(&store, ChannelId(42)).await;
    assert!(!has_channel_permission(
        &state,
        &member,
        &orphan,
        Permission::Chat(ChatPermission::PostMessages)
    )
    .await
    .expect("check should resolve"));
}

#[tokio::test]
async fn inheritance_cycles_hit_the_depth_cap_instead_of_hanging() {
    let (state, store) = scenario().await;
    store
        .insert_channel(Channel {
            id: ChannelId(50),
            planet_id: PLANET,
            kind: ChannelKind::Category,
            parent_id: Some(ChannelId(51)),
            inherits_perms: true,
        })
        .await;
    store
        .insert_channel(Channel {
            id: ChannelId(51),
            planet_id: PLANET,
            kind: ChannelKind::Category,
            parent_id: Some(ChannelId(50)),
            inherits_perms: true,
        })
        .await;

    let member = member_with(2, 7, RoleMembership::empty().with(0));
    store.insert_member(&member).await.expect("seed member");

    let looped = channel(&store, ChannelId(50)).await;
    let allowed = has_channel_permission(
        &state,
        &member,
        &looped,
        Permission::Category(orrery_core::CategoryPermission::View),
    )
    .await
    .expect("check should resolve");
    assert!(allowed, "cycle resolves from defaults instead of hanging");
}

#[tokio::test]
async fn planet_view_is_granted_by_existence_and_scoped_to_the_planet() {
    let (state, store) = scenario().await;
    let member = member_with(2, 7, RoleMembership::empty().with(0));
    store.insert_member(&member).await.expect("seed member");

    assert!(has_planet_permission(&state, &member, PlanetPermission::View)
        .await
        .expect("check should resolve"));
    assert!(!has_planet_permission(&state, &member, PlanetPermission::Ban)
        .await
        .expect("check should resolve"));

    // A channel in another planet denies regardless of roles.
    store
        .insert_channel(Channel {
            id: ChannelId(70),
            planet_id: PlanetId(2),
            kind: ChannelKind::Chat,
            parent_id: None,
            inherits_perms: false,
        })
        .await;
    let foreign = channel(&store, ChannelId(70)).await;
    assert!(!has_channel_permission(
        &state,
        &member,
        &foreign,
        Permission::Chat(ChatPermission::View)
    )
    .await
    .expect("check should resolve"));
}

#[tokio::test]
async fn scenario_matrix_default_allows_and_senior_deny_hides_the_channel() {
    let (state, store) = scenario().await;
    // Role R above the default role with an explicit chat View deny at X.
    let restricted = base_role(11, 5, 1);
    store.insert_role(&restricted).await.expect("seed role");
    let deny_view = PermissionsNode::empty(restricted.id, CHANNEL, TargetType::ChatChannel)
        .with_state(Permission::Chat(ChatPermission::View), PermissionState::Deny);
    store.upsert_node(&deny_view).await.expect("seed node");

    let m = member_with(2, 7, RoleMembership::empty().with(0));
    let n = member_with(3, 8, RoleMembership::empty().with(0).with(1));
    store.insert_member(&m).await.expect("seed member");
    store.insert_member(&n).await.expect("seed member");

    let chat = channel(&store, CHANNEL).await;
    assert!(has_channel_permission(&state, &m, &chat, Permission::Chat(ChatPermission::View))
        .await
        .expect("check should resolve"));
    assert!(!has_channel_permission(&state, &n, &chat, Permission::Chat(ChatPermission::View))
        .await
        .expect("check should resolve"));
    for permission in [
        Permission::Chat(ChatPermission::PostMessages),
        Permission::Chat(ChatPermission::Embed),
        Permission::Chat(ChatPermission::ManageMessages),
    ] {
        assert!(
            !has_channel_permission(&state, &n, &chat, permission)
                .await
                .expect("check should resolve"),
            "hidden channel must not grant {permission}"
        );
    }
}

#[tokio::test]
async fn authority_gates_role_management_below_the_primary_role() {
    let (state, store) = scenario().await;
    let officer_role = base_role(11, 3, 1);
    let peer_role = base_role(12, 3, 2);
    let lower_role = base_role(13, 8, 3);
    store.insert_role(&officer_role).await.expect("seed role");
    store.insert_role(&lower_role).await.expect("seed role");

    let officer = member_with(2, 7, RoleMembership::empty().with(0).with(1));
    store.insert_member(&officer).await.expect("seed member");

    assert!(can_manage_role(&state, &officer, &lower_role)
        .await
        .expect("check should resolve"));
    assert!(!can_manage_role(&state, &officer, &officer_role)
        .await
        .expect("check should resolve"));
    assert!(!can_manage_role(&state, &officer, &peer_role)
        .await
        .expect("check should resolve"));

    let owner = member_with(3, OWNER_USER.0, RoleMembership::empty().with(0));
    store.insert_member(&owner).await.expect("seed member");
    assert!(can_manage_role(&state, &owner, &officer_role)
        .await
        .expect("check should resolve"));
}

#[tokio::test]
async fn deleted_member_lookup_never_serves_the_stale_cache_entry() {
    let (state, store) = scenario().await;
    let member = member_with(2, 7, RoleMembership::empty().with(0));
    store.insert_member(&member).await.expect("seed member");

    let resolved = member_by_user(&state, UserId(7), PLANET)
        .await
        .expect("lookup should succeed")
        .expect("member should resolve");
    assert_eq!(resolved.id, member.id);

    leave_planet(&state, member.id)
        .await
        .expect("leave should succeed");

    let after = member_by_user(&state, UserId(7), PLANET)
        .await
        .expect("lookup should succeed");
    assert!(after.is_none());
}

#[tokio::test]
async fn deleted_members_hold_no_permissions() {
    let (state, store) = scenario().await;
    let mut member = member_with(2, 7, RoleMembership::empty().with(0));
    member.is_deleted = true;
    store.insert_member(&member).await.expect("seed member");

    let chat = channel(&store, CHANNEL).await;
    assert!(!has_channel_permission(
        &state,
        &member,
        &chat,
        Permission::Chat(ChatPermission::View)
    )
    .await
    .expect("check should resolve"));
    assert!(!has_planet_permission(&state, &member, PlanetPermission::View)
        .await
        .expect("check should resolve"));
}

struct StalledStore;

#[async_trait::async_trait]
impl PermissionStore for StalledStore {
    async fn allocate_id(&self) -> Result<i64, orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn planet(
        &self,
        _id: PlanetId,
    ) -> Result<Option<Planet>, orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn channel(
        &self,
        _id: ChannelId,
    ) -> Result<Option<Channel>, orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn member(
        &self,
        _id: MemberId,
    ) -> Result<Option<PlanetMember>, orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn live_member_by_user(
        &self,
        _user_id: UserId,
        _planet_id: PlanetId,
    ) -> Result<Option<PlanetMember>, orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn member_by_user_any(
        &self,
        _user_id: UserId,
        _planet_id: PlanetId,
    ) -> Result<Option<PlanetMember>, orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn role(
        &self,
        _id: RoleId,
    ) -> Result<Option<PlanetRole>, orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn planet_roles(
        &self,
        _planet_id: PlanetId,
    ) -> Result<Vec<PlanetRole>, orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn nodes_for_target(
        &self,
        _role_ids: &[RoleId],
        _target_id: ChannelId,
        _target_type: TargetType,
    ) -> Result<std::collections::HashMap<RoleId, PermissionsNode>, orrery_engine::StoreError>
    {
        std::future::pending().await
    }
    async fn node(
        &self,
        _role_id: RoleId,
        _target_id: ChannelId,
        _target_type: TargetType,
    ) -> Result<Option<PermissionsNode>, orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn insert_member(
        &self,
        _member: &PlanetMember,
    ) -> Result<(), orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn update_member(
        &self,
        _member: &PlanetMember,
    ) -> Result<(), orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn insert_role(&self, _role: &PlanetRole) -> Result<(), orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn update_role(&self, _role: &PlanetRole) -> Result<(), orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn update_role_positions(
        &self,
        _planet_id: PlanetId,
        _positions: &[(RoleId, u32)],
    ) -> Result<(), orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn delete_role(&self, _id: RoleId) -> Result<(), orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn clear_role_flag(
        &self,
        _planet_id: PlanetId,
        _flag_index: u8,
    ) -> Result<(), orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn upsert_node(
        &self,
        _node: &PermissionsNode,
    ) -> Result<(), orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn delete_node(
        &self,
        _role_id: RoleId,
        _target_id: ChannelId,
        _target_type: TargetType,
    ) -> Result<(), orrery_engine::StoreError> {
        std::future::pending().await
    }
    async fn delete_nodes_for_role(
        &self,
        _role_id: RoleId,
    ) -> Result<(), orrery_engine::StoreError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_store_resolves_to_deny_instead_of_hanging() {
    let state = EngineState::new(
        Arc::new(StalledStore),
        Arc::new(NullRelay),
        EngineConfig::default(),
    );
    let member = member_with(2, 7, RoleMembership::empty().with(0));
    let chat = Channel {
        id: CHANNEL,
        planet_id: PLANET,
        kind: ChannelKind::Chat,
        parent_id: None,
        inherits_perms: false,
    };

    let allowed = has_channel_permission(
        &state,
        &member,
        &chat,
        Permission::Chat(ChatPermission::PostMessages),
    )
    .await
    .expect("timeout must resolve to deny, not an error");
    assert!(!allowed);
}
