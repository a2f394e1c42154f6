#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Returns the project code name.
#[must_use]
pub const fn project_name() -> &'static str {
    "orrery"
}

/// Number of role flag bits carried per planet member.
pub const ROLE_FLAG_BITS: u16 = 256;

/// Authority sentinel for the planet owner.
pub const OWNER_AUTHORITY: i64 = i64::MAX;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("nickname is invalid")]
    InvalidNickname,
    #[error("role name is invalid")]
    InvalidRoleName,
}

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(
    /// A planet row id.
    PlanetId
);
id_newtype!(
    /// A user row id. Users exist outside any planet.
    UserId
);
id_newtype!(
    /// A planet membership row id.
    MemberId
);
id_newtype!(
    /// A planet role row id.
    RoleId
);
id_newtype!(
    /// A channel or category row id.
    ChannelId
);
id_newtype!(
    /// A chat message id, assigned by the caller before staging.
    MessageId
);

/// Validated planet member nickname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemberNickname(String);

impl MemberNickname {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MemberNickname {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !(1..=32).contains(&value.chars().count()) {
            return Err(DomainError::InvalidNickname);
        }
        if value.trim().is_empty() {
            return Err(DomainError::InvalidNickname);
        }
        if value.chars().any(char::is_control) {
            return Err(DomainError::InvalidNickname);
        }
        Ok(Self(value))
    }
}

impl From<MemberNickname> for String {
    fn from(value: MemberNickname) -> Self {
        value.0
    }
}

/// Validated role name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoleName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !(1..=32).contains(&value.chars().count()) || value.trim().is_empty() {
            return Err(DomainError::InvalidRoleName);
        }
        if value.chars().all(|c| !c.is_control()) {
            return Ok(Self(value));
        }
        Err(DomainError::InvalidRoleName)
    }
}

impl From<RoleName> for String {
    fn from(value: RoleName) -> Self {
        value.0
    }
}

/// The kind of a planet channel row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Chat,
    Category,
    Voice,
}

impl ChannelKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Category => "category",
            Self::Voice => "voice",
        }
    }

    #[must_use]
    pub const fn target_type(self) -> TargetType {
        match self {
            Self::Chat => TargetType::ChatChannel,
            Self::Category => TargetType::Category,
            Self::Voice => TargetType::VoiceChannel,
        }
    }
}

/// What a permission bit (and a permission node) applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    ChatChannel,
    Category,
    VoiceChannel,
    Planet,
}

impl TargetType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatChannel => "chat_channel",
            Self::Category => "category",
            Self::VoiceChannel => "voice_channel",
            Self::Planet => "planet",
        }
    }

    /// The View permission of this target's category. View is bit zero in
    /// every category and gates everything else at the same target.
    #[must_use]
    pub const fn view_permission(self) -> Permission {
        match self {
            Self::ChatChannel => Permission::Chat(ChatPermission::View),
            Self::Category => Permission::Category(CategoryPermission::View),
            Self::VoiceChannel => Permission::Voice(VoicePermission::View),
            Self::Planet => Permission::Planet(PlanetPermission::View),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPermission {
    View,
    ViewMessages,
    PostMessages,
    ManageChannel,
    ManagePermissions,
    Embed,
    AttachContent,
    ManageMessages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryPermission {
    View,
    ManageCategory,
    ManagePermissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoicePermission {
    View,
    Join,
    Speak,
    ManageChannel,
    ManagePermissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanetPermission {
    View,
    Invite,
    DisplayRole,
    Manage,
    Kick,
    Ban,
    ManageChannels,
    ManageRoles,
}

const fn chat_permission_mask(permission: ChatPermission) -> u64 {
    match permission {
        ChatPermission::View => 1 << 0,
        ChatPermission::ViewMessages => 1 << 1,
        ChatPermission::PostMessages => 1 << 2,
        ChatPermission::ManageChannel => 1 << 3,
        ChatPermission::ManagePermissions => 1 << 4,
        ChatPermission::Embed => 1 << 5,
        ChatPermission::AttachContent => 1 << 6,
        ChatPermission::ManageMessages => 1 << 7,
    }
}

const fn category_permission_mask(permission: CategoryPermission) -> u64 {
    match permission {
        CategoryPermission::View => 1 << 0,
        CategoryPermission::ManageCategory => 1 << 1,
        CategoryPermission::ManagePermissions => 1 << 2,
    }
}

const fn voice_permission_mask(permission: VoicePermission) -> u64 {
    match permission {
        VoicePermission::View => 1 << 0,
        VoicePermission::Join => 1 << 1,
        VoicePermission::Speak => 1 << 2,
        VoicePermission::ManageChannel => 1 << 3,
        VoicePermission::ManagePermissions => 1 << 4,
    }
}

const fn planet_permission_mask(permission: PlanetPermission) -> u64 {
    match permission {
        PlanetPermission::View => 1 << 0,
        PlanetPermission::Invite => 1 << 1,
        PlanetPermission::DisplayRole => 1 << 2,
        PlanetPermission::Manage => 1 << 3,
        PlanetPermission::Kick => 1 << 4,
        PlanetPermission::Ban => 1 << 5,
        PlanetPermission::ManageChannels => 1 << 6,
        PlanetPermission::ManageRoles => 1 << 7,
    }
}

/// One named capability: a bit position inside one permission category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "category", content = "permission")]
pub enum Permission {
    Chat(ChatPermission),
    Category(CategoryPermission),
    Voice(VoicePermission),
    Planet(PlanetPermission),
}

impl Permission {
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::Chat(p) => chat_permission_mask(p),
            Self::Category(p) => category_permission_mask(p),
            Self::Voice(p) => voice_permission_mask(p),
            Self::Planet(p) => planet_permission_mask(p),
        }
    }

    #[must_use]
    pub const fn target_type(self) -> TargetType {
        match self {
            Self::Chat(_) => TargetType::ChatChannel,
            Self::Category(_) => TargetType::Category,
            Self::Voice(_) => TargetType::VoiceChannel,
            Self::Planet(_) => TargetType::Planet,
        }
    }

    /// Stable dotted name used in logs and denial messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Chat(ChatPermission::View) => "chat.view",
            Self::Chat(ChatPermission::ViewMessages) => "chat.view_messages",
            Self::Chat(ChatPermission::PostMessages) => "chat.post_messages",
            Self::Chat(ChatPermission::ManageChannel) => "chat.manage_channel",
            Self::Chat(ChatPermission::ManagePermissions) => "chat.manage_permissions",
            Self::Chat(ChatPermission::Embed) => "chat.embed",
            Self::Chat(ChatPermission::AttachContent) => "chat.attach_content",
            Self::Chat(ChatPermission::ManageMessages) => "chat.manage_messages",
            Self::Category(CategoryPermission::View) => "category.view",
            Self::Category(CategoryPermission::ManageCategory) => "category.manage_category",
            Self::Category(CategoryPermission::ManagePermissions) => "category.manage_permissions",
            Self::Voice(VoicePermission::View) => "voice.view",
            Self::Voice(VoicePermission::Join) => "voice.join",
            Self::Voice(VoicePermission::Speak) => "voice.speak",
            Self::Voice(VoicePermission::ManageChannel) => "voice.manage_channel",
            Self::Voice(VoicePermission::ManagePermissions) => "voice.manage_permissions",
            Self::Planet(PlanetPermission::View) => "planet.view",
            Self::Planet(PlanetPermission::Invite) => "planet.invite",
            Self::Planet(PlanetPermission::DisplayRole) => "planet.display_role",
            Self::Planet(PlanetPermission::Manage) => "planet.manage",
            Self::Planet(PlanetPermission::Kick) => "planet.kick",
            Self::Planet(PlanetPermission::Ban) => "planet.ban",
            Self::Planet(PlanetPermission::ManageChannels) => "planet.manage_channels",
            Self::Planet(PlanetPermission::ManageRoles) => "planet.manage_roles",
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A bag of permission bits within one category.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PermissionSet(u64);

impl PermissionSet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, permission: Permission) -> bool {
        self.0 & permission.mask() != 0
    }

    pub fn insert(&mut self, permission: Permission) {
        self.0 |= permission.mask();
    }

    pub fn remove(&mut self, permission: Permission) {
        self.0 &= !permission.mask();
    }
}

/// Tests one bit of a raw category mask.
#[must_use]
pub const fn has_permission(mask: u64, permission: Permission) -> bool {
    mask & permission.mask() != 0
}

#[must_use]
pub fn default_chat_permissions() -> PermissionSet {
    let mut set = PermissionSet::empty();
    set.insert(Permission::Chat(ChatPermission::View));
    set.insert(Permission::Chat(ChatPermission::ViewMessages));
    set.insert(Permission::Chat(ChatPermission::PostMessages));
    set.insert(Permission::Chat(ChatPermission::Embed));
    set.insert(Permission::Chat(ChatPermission::AttachContent));
    set
}

#[must_use]
pub fn default_category_permissions() -> PermissionSet {
    let mut set = PermissionSet::empty();
    set.insert(Permission::Category(CategoryPermission::View));
    set
}

#[must_use]
pub fn default_voice_permissions() -> PermissionSet {
    let mut set = PermissionSet::empty();
    set.insert(Permission::Voice(VoicePermission::View));
    set.insert(Permission::Voice(VoicePermission::Join));
    set.insert(Permission::Voice(VoicePermission::Speak));
    set
}

#[must_use]
pub fn default_planet_permissions() -> PermissionSet {
    let mut set = PermissionSet::empty();
    set.insert(Permission::Planet(PlanetPermission::View));
    set.insert(Permission::Planet(PlanetPermission::Invite));
    set.insert(Permission::Planet(PlanetPermission::DisplayRole));
    set
}

/// Resolution of one permission bit at one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Undefined,
    Allow,
    Deny,
}

/// A per-(role, target) override of one or more permission bits.
///
/// For a bit B: `mask` bit B unset means the role expresses no opinion on B
/// at this target; `mask` bit B set means the effective value is `code` bit
/// B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsNode {
    pub role_id: RoleId,
    pub target_id: ChannelId,
    pub target_type: TargetType,
    pub code: u64,
    pub mask: u64,
}

impl PermissionsNode {
    #[must_use]
    pub const fn empty(role_id: RoleId, target_id: ChannelId, target_type: TargetType) -> Self {
        Self {
            role_id,
            target_id,
            target_type,
            code: 0,
            mask: 0,
        }
    }

    /// Three-valued lookup for one permission bit. A permission from a
    /// different category than this node's target resolves to `Undefined`.
    #[must_use]
    pub const fn state_for(&self, permission: Permission) -> PermissionState {
        if !matches!(
            (permission.target_type(), self.target_type),
            (TargetType::ChatChannel, TargetType::ChatChannel)
                | (TargetType::Category, TargetType::Category)
                | (TargetType::VoiceChannel, TargetType::VoiceChannel)
                | (TargetType::Planet, TargetType::Planet)
        ) {
            return PermissionState::Undefined;
        }
        let bit = permission.mask();
        if self.mask & bit == 0 {
            return PermissionState::Undefined;
        }
        if self.code & bit != 0 {
            PermissionState::Allow
        } else {
            PermissionState::Deny
        }
    }

    /// Returns a copy with one permission bit set to the given state.
    #[must_use]
    pub const fn with_state(mut self, permission: Permission, state: PermissionState) -> Self {
        let bit = permission.mask();
        match state {
            PermissionState::Undefined => {
                self.mask &= !bit;
                self.code &= !bit;
            }
            PermissionState::Allow => {
                self.mask |= bit;
                self.code |= bit;
            }
            PermissionState::Deny => {
                self.mask |= bit;
                self.code &= !bit;
            }
        }
        self
    }

    /// True when no bit is explicitly set.
    #[must_use]
    pub const fn is_vacant(&self) -> bool {
        self.mask == 0
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Which roles a member holds, as a 256-bit set over planet-relative role
/// flag indices. Stored as four words so it round-trips through four
/// bigint columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleMembership {
    pub rf0: u64,
    pub rf1: u64,
    pub rf2: u64,
    pub rf3: u64,
}

impl RoleMembership {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            rf0: 0,
            rf1: 0,
            rf2: 0,
            rf3: 0,
        }
    }

    #[must_use]
    pub const fn from_words(rf0: u64, rf1: u64, rf2: u64, rf3: u64) -> Self {
        Self { rf0, rf1, rf2, rf3 }
    }

    const fn words(self) -> [u64; 4] {
        [self.rf0, self.rf1, self.rf2, self.rf3]
    }

    #[must_use]
    pub const fn contains(self, flag_index: u8) -> bool {
        self.words()[(flag_index >> 6) as usize] & (1 << (flag_index & 63)) != 0
    }

    /// Returns a copy with the given role bit set.
    #[must_use]
    pub const fn with(self, flag_index: u8) -> Self {
        let mut words = self.words();
        words[(flag_index >> 6) as usize] |= 1 << (flag_index & 63);
        Self::from_words(words[0], words[1], words[2], words[3])
    }

    /// Returns a copy with the given role bit cleared.
    #[must_use]
    pub const fn without(self, flag_index: u8) -> Self {
        let mut words = self.words();
        words[(flag_index >> 6) as usize] &= !(1 << (flag_index & 63));
        Self::from_words(words[0], words[1], words[2], words[3])
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.rf0 == 0 && self.rf1 == 0 && self.rf2 == 0 && self.rf3 == 0
    }

    #[must_use]
    pub const fn len(self) -> u32 {
        self.rf0.count_ones()
            + self.rf1.count_ones()
            + self.rf2.count_ones()
            + self.rf3.count_ones()
    }

    /// Set flag indices, ascending.
    pub fn indices(self) -> impl Iterator<Item = u8> {
        (0_u16..ROLE_FLAG_BITS)
            .map(|index| index as u8)
            .filter(move |index| self.contains(*index))
    }

    /// Deterministic FNV-1a fold over the four words. Cache key and change
    /// detector only: callers must re-verify with an exact compare before
    /// trusting a hash match.
    #[must_use]
    pub const fn hash(self) -> u64 {
        let mut h = FNV_OFFSET_BASIS;
        let words = self.words();
        let mut i = 0;
        while i < 4 {
            let mut word = words[i];
            let mut byte = 0;
            while byte < 8 {
                h ^= word & 0xff;
                h = h.wrapping_mul(FNV_PRIME);
                word >>= 8;
                byte += 1;
            }
            i += 1;
        }
        h
    }
}

/// A planet role row. `position` orders authority (0 = most authoritative);
/// `flag_index` is the stable membership bit, unchanged by reorders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanetRole {
    pub id: RoleId,
    pub planet_id: PlanetId,
    pub name: RoleName,
    pub position: u32,
    pub flag_index: u8,
    pub is_admin: bool,
    pub is_default: bool,
    pub chat_perms: PermissionSet,
    pub category_perms: PermissionSet,
    pub voice_perms: PermissionSet,
    pub planet_perms: PermissionSet,
}

impl PlanetRole {
    /// The category default mask consulted when no node decided a bit.
    #[must_use]
    pub const fn default_mask_for(&self, kind: ChannelKind) -> PermissionSet {
        match kind {
            ChannelKind::Chat => self.chat_perms,
            ChannelKind::Category => self.category_perms,
            ChannelKind::Voice => self.voice_perms,
        }
    }

    #[must_use]
    pub const fn authority(&self) -> i64 {
        role_authority(self.position)
    }
}

/// A planet row, reduced to what permission evaluation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Planet {
    pub id: PlanetId,
    pub owner_user_id: UserId,
    pub default_role_id: RoleId,
}

/// A channel or category row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub planet_id: PlanetId,
    pub kind: ChannelKind,
    pub parent_id: Option<ChannelId>,
    pub inherits_perms: bool,
}

/// A user's membership record within one planet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanetMember {
    pub id: MemberId,
    pub user_id: UserId,
    pub planet_id: PlanetId,
    pub nickname: MemberNickname,
    pub is_deleted: bool,
    pub membership: RoleMembership,
}

/// Authority of a role position. Lower position means higher authority;
/// the result never reaches [`OWNER_AUTHORITY`].
#[must_use]
pub const fn role_authority(position: u32) -> i64 {
    i64::MAX - position as i64 - 1
}

/// May an actor with the given standing manage (create at, edit, delete,
/// assign, revoke) a role at `target_position`? Owners may manage any
/// role; everyone else only roles strictly below their primary role.
#[must_use]
pub const fn can_manage_role(
    actor_is_owner: bool,
    actor_primary_position: u32,
    target_position: u32,
) -> bool {
    if actor_is_owner {
        return true;
    }
    target_position > actor_primary_position
}

/// May an actor act on (kick, edit, moderate) another member? Requires
/// strictly greater authority; owners outrank everyone but themselves.
#[must_use]
pub const fn can_act_on(actor_authority: i64, target_authority: i64) -> bool {
    actor_authority > target_authority
}
