use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::model::{Entity, EntityKind, MessageId, ReactionId, UserId};
use crate::state::query::SortKey;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageReaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_score")]
    pub score: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

fn default_score() -> u32 {
    1
}

impl MessageReaction {
    pub fn new(
        message_id: MessageId,
        user_id: UserId,
        kind: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            user_id,
            kind: kind.into(),
            score: default_score(),
            created_at,
            updated_at: created_at,
        }
    }
}

impl Entity for MessageReaction {
    type Id = ReactionId;
    type SortKey = ReactionSortingKey;

    const KIND: EntityKind = EntityKind::Reaction;

    fn id(&self) -> ReactionId {
        ReactionId::from_parts(&self.message_id, &self.user_id, &self.kind)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionSortingKey {
    CreatedAt,
    UpdatedAt,
    Score,
}

impl SortKey<MessageReaction> for ReactionSortingKey {
    fn compare(&self, lhs: &MessageReaction, rhs: &MessageReaction) -> Ordering {
        match self {
            ReactionSortingKey::CreatedAt => lhs.created_at.cmp(&rhs.created_at),
            ReactionSortingKey::UpdatedAt => lhs.updated_at.cmp(&rhs.updated_at),
            ReactionSortingKey::Score => lhs.score.cmp(&rhs.score),
        }
    }
}
