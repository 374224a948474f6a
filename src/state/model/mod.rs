//! Entities handed to consumers. Each is an immutable value copy of a store record.

mod channel;
mod ids;
mod member;
mod message;
mod reaction;
mod user;

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::state::query::SortKey;

pub use channel::{ChannelListSortingKey, ChatChannel};
pub use ids::{ChannelId, EntityId, MemberId, MessageId, ReactionId, UserId};
pub use member::{ChannelMember, ChannelMemberListSortingKey};
pub use message::{ChatMessage, LocalMessageState, MessageSortingKey};
pub use reaction::{MessageReaction, ReactionSortingKey};
pub use user::{ChatUser, UserListSortingKey};

/// Store table an entity lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Channel,
    Message,
    User,
    Member,
    Reaction,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Channel => "channel",
            EntityKind::Message => "message",
            EntityKind::User => "user",
            EntityKind::Member => "member",
            EntityKind::Reaction => "reaction",
        }
    }
}

pub trait Entity:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Id: EntityId;
    type SortKey: SortKey<Self>;

    const KIND: EntityKind;

    fn id(&self) -> Self::Id;
}

pub(crate) mod timestamps {
    use chrono::{DateTime, TimeZone, Utc};

    /// Builds a timestamp from epoch milliseconds, clamping out-of-range values to the epoch.
    pub fn from_millis(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}
