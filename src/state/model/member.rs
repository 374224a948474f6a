use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::model::{ChannelId, ChatUser, Entity, EntityKind, MemberId};
use crate::state::query::SortKey;

/// A user's membership of one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMember {
    pub cid: ChannelId,
    pub user: ChatUser,
    #[serde(default = "default_channel_role")]
    pub channel_role: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_banned: bool,
}

fn default_channel_role() -> String {
    "channel_member".to_owned()
}

impl ChannelMember {
    pub fn new(cid: ChannelId, user: ChatUser, created_at: DateTime<Utc>) -> Self {
        Self {
            cid,
            user,
            channel_role: default_channel_role(),
            created_at,
            updated_at: created_at,
            is_banned: false,
        }
    }
}

impl Entity for ChannelMember {
    type Id = MemberId;
    type SortKey = ChannelMemberListSortingKey;

    const KIND: EntityKind = EntityKind::Member;

    fn id(&self) -> MemberId {
        MemberId::from_parts(&self.cid, &self.user.id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMemberListSortingKey {
    CreatedAt,
    UpdatedAt,
    Name,
    UserId,
}

impl SortKey<ChannelMember> for ChannelMemberListSortingKey {
    fn compare(&self, lhs: &ChannelMember, rhs: &ChannelMember) -> Ordering {
        match self {
            ChannelMemberListSortingKey::CreatedAt => lhs.created_at.cmp(&rhs.created_at),
            ChannelMemberListSortingKey::UpdatedAt => lhs.updated_at.cmp(&rhs.updated_at),
            ChannelMemberListSortingKey::Name => lhs.user.name.cmp(&rhs.user.name),
            ChannelMemberListSortingKey::UserId => lhs.user.id.cmp(&rhs.user.id),
        }
    }
}
