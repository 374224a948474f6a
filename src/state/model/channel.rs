use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::model::{ChannelId, Entity, EntityKind, MessageId, UserId};
use crate::state::query::SortKey;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatChannel {
    pub cid: ChannelId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub is_frozen: bool,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
    /// Read state of the configured user.
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_read_message_id: Option<MessageId>,
    #[serde(default)]
    pub extra_data: Map<String, Value>,
}

impl ChatChannel {
    pub fn new(cid: ChannelId, created_at: DateTime<Utc>) -> Self {
        Self {
            cid,
            name: None,
            created_at,
            updated_at: created_at,
            last_message_at: None,
            member_count: 0,
            is_hidden: false,
            is_frozen: false,
            team: None,
            member_ids: Vec::new(),
            unread_count: 0,
            last_read_at: None,
            last_read_message_id: None,
            extra_data: Map::new(),
        }
    }

    /// Channels without messages sort by their creation time.
    pub fn default_sorting_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }

    pub fn has_member(&self, user_id: &UserId) -> bool {
        self.member_ids.contains(user_id)
    }
}

impl Entity for ChatChannel {
    type Id = ChannelId;
    type SortKey = ChannelListSortingKey;

    const KIND: EntityKind = EntityKind::Channel;

    fn id(&self) -> ChannelId {
        self.cid.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelListSortingKey {
    /// `last_message_at`, falling back to `created_at`.
    Default,
    CreatedAt,
    UpdatedAt,
    LastMessageAt,
    MemberCount,
    Cid,
    Name,
}

impl SortKey<ChatChannel> for ChannelListSortingKey {
    fn compare(&self, lhs: &ChatChannel, rhs: &ChatChannel) -> Ordering {
        match self {
            ChannelListSortingKey::Default | ChannelListSortingKey::LastMessageAt => {
                lhs.default_sorting_at().cmp(&rhs.default_sorting_at())
            }
            ChannelListSortingKey::CreatedAt => lhs.created_at.cmp(&rhs.created_at),
            ChannelListSortingKey::UpdatedAt => lhs.updated_at.cmp(&rhs.updated_at),
            ChannelListSortingKey::MemberCount => lhs.member_count.cmp(&rhs.member_count),
            ChannelListSortingKey::Cid => lhs.cid.cmp(&rhs.cid),
            ChannelListSortingKey::Name => lhs.name.cmp(&rhs.name),
        }
    }
}
