use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::model::{ChannelId, Entity, EntityKind, MessageId, UserId};
use crate::state::query::SortKey;

/// Where a locally originated change to a message stands. Messages as the server
/// knows them carry no local state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalMessageState {
    Sending,
    SendingFailed,
    Syncing,
    SyncingFailed,
    Deleting,
    DeletingFailed,
}

impl LocalMessageState {
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            LocalMessageState::SendingFailed
                | LocalMessageState::SyncingFailed
                | LocalMessageState::DeletingFailed
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub cid: ChannelId,
    #[serde(default)]
    pub text: String,
    pub user_id: UserId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Set for thread replies.
    #[serde(default)]
    pub parent_id: Option<MessageId>,
    /// A reply that is also shown in the main channel timeline.
    #[serde(default)]
    pub show_in_channel: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub pinned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reaction_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub local_state: Option<LocalMessageState>,
}

impl ChatMessage {
    pub fn new(
        id: MessageId,
        cid: ChannelId,
        user_id: UserId,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            cid,
            text: text.into(),
            user_id,
            created_at,
            updated_at: created_at,
            parent_id: None,
            show_in_channel: false,
            deleted_at: None,
            reply_count: 0,
            pinned: false,
            pinned_at: None,
            reaction_counts: BTreeMap::new(),
            local_state: None,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Whether the message belongs to the main channel timeline.
    pub fn is_in_channel_timeline(&self) -> bool {
        self.parent_id.is_none() || self.show_in_channel
    }
}

impl Entity for ChatMessage {
    type Id = MessageId;
    type SortKey = MessageSortingKey;

    const KIND: EntityKind = EntityKind::Message;

    fn id(&self) -> MessageId {
        self.id.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSortingKey {
    CreatedAt,
    UpdatedAt,
    PinnedAt,
}

impl SortKey<ChatMessage> for MessageSortingKey {
    fn compare(&self, lhs: &ChatMessage, rhs: &ChatMessage) -> Ordering {
        match self {
            MessageSortingKey::CreatedAt => lhs.created_at.cmp(&rhs.created_at),
            MessageSortingKey::UpdatedAt => lhs.updated_at.cmp(&rhs.updated_at),
            MessageSortingKey::PinnedAt => lhs.pinned_at.cmp(&rhs.pinned_at),
        }
    }
}
