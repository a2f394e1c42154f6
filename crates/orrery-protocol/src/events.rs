use orrery_core::{
    ChannelId, MemberId, MessageId, PermissionsNode, PlanetId, PlanetMember, PlanetRole, RoleId,
    TargetType,
};
use serde::{Deserialize, Serialize};

/// A staged chat message as relayed to connected clients. `channel_index`
/// is the strictly increasing per-channel sequence assigned at staging
/// time; persisted order matches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayedMessage {
    pub id: MessageId,
    pub planet_id: PlanetId,
    pub channel_id: ChannelId,
    pub author_member_id: MemberId,
    pub content: String,
    pub channel_index: u64,
    pub sent_at_unix: i64,
}

/// Events published toward the real-time relay after a permission-affecting
/// mutation commits, plus the staged-message broadcast. Consumers
/// re-evaluate visibility on receipt; the payloads carry full rows so
/// clients need no follow-up fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanetEvent {
    MemberUpdated { member: PlanetMember },
    MemberDeleted { planet_id: PlanetId, member_id: MemberId },
    RoleUpdated { role: PlanetRole },
    RoleDeleted { planet_id: PlanetId, role_id: RoleId },
    RolesReordered { planet_id: PlanetId, role_ids: Vec<RoleId> },
    NodeUpdated {
        planet_id: PlanetId,
        node: PermissionsNode,
    },
    NodeDeleted {
        planet_id: PlanetId,
        role_id: RoleId,
        target_id: ChannelId,
        target_type: TargetType,
    },
    MessageCreated { message: RelayedMessage },
}

impl PlanetEvent {
    /// The wire event type, identical to the serde tag.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::MemberUpdated { .. } => "member_updated",
            Self::MemberDeleted { .. } => "member_deleted",
            Self::RoleUpdated { .. } => "role_updated",
            Self::RoleDeleted { .. } => "role_deleted",
            Self::RolesReordered { .. } => "roles_reordered",
            Self::NodeUpdated { .. } => "node_updated",
            Self::NodeDeleted { .. } => "node_deleted",
            Self::MessageCreated { .. } => "message_created",
        }
    }

    /// The planet the event belongs to, for fanout routing.
    #[must_use]
    pub fn planet_id(&self) -> PlanetId {
        match self {
            Self::MemberUpdated { member } => member.planet_id,
            Self::MemberDeleted { planet_id, .. }
            | Self::RoleDeleted { planet_id, .. }
            | Self::RolesReordered { planet_id, .. }
            | Self::NodeUpdated { planet_id, .. }
            | Self::NodeDeleted { planet_id, .. } => *planet_id,
            Self::RoleUpdated { role } => role.planet_id,
            Self::MessageCreated { message } => message.planet_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use orrery_core::{
        ChannelId, MemberId, MemberNickname, PlanetId, PlanetMember, RoleMembership, UserId,
    };

    use super::{PlanetEvent, RelayedMessage};

    #[test]
    fn event_type_matches_serde_tag() {
        let event = PlanetEvent::MemberUpdated {
            member: PlanetMember {
                id: MemberId(1),
                user_id: UserId(2),
                planet_id: PlanetId(3),
                nickname: MemberNickname::try_from(String::from("Kep"))
                    .expect("nickname should validate"),
                is_deleted: false,
                membership: RoleMembership::empty(),
            },
        };
        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["type"], event.event_type());
    }

    #[test]
    fn relayed_message_round_trips() {
        let message = RelayedMessage {
            id: orrery_core::MessageId(9),
            planet_id: PlanetId(1),
            channel_id: ChannelId(2),
            author_member_id: MemberId(3),
            content: String::from("hello"),
            channel_index: 41,
            sent_at_unix: 1_700_000_000,
        };
        let event = PlanetEvent::MessageCreated {
            message: message.clone(),
        };
        let bytes = serde_json::to_vec(&event).expect("event should serialize");
        let parsed: PlanetEvent = serde_json::from_slice(&bytes).expect("event should parse");
        assert_eq!(parsed, event);
        assert_eq!(parsed.event_type(), "message_created");
    }
}
