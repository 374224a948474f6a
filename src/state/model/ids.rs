use std::fmt::{self, Debug, Display};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::state::error::{invalid_argument, StateResult};

/// Identity of a persisted entity. Store records are keyed by [`EntityId::as_key`].
pub trait EntityId:
    Clone + Debug + Display + Ord + Hash + Serialize + Send + Sync + 'static
{
    fn as_key(&self) -> &str;
    fn from_key(key: &str) -> Self;
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl EntityId for $name {
            fn as_key(&self) -> &str {
                &self.0
            }

            fn from_key(key: &str) -> Self {
                Self::new(key)
            }
        }
    };
}

string_id!(
    /// Channel identifier in `type:id` form, e.g. `messaging:general`.
    ChannelId
);
string_id!(MessageId);
string_id!(UserId);
string_id!(
    /// Channel membership identity, `cid/user`.
    MemberId
);
string_id!(
    /// Reaction identity, `message/user/type`.
    ReactionId
);

impl ChannelId {
    pub fn from_parts(kind: &str, id: &str) -> Self {
        Self(format!("{kind}:{id}"))
    }

    /// Parses a `type:id` string, rejecting empty halves.
    pub fn parse(cid: &str) -> StateResult<Self> {
        match cid.split_once(':') {
            Some((kind, id)) if !kind.is_empty() && !id.is_empty() => Ok(Self::new(cid)),
            _ => Err(invalid_argument(format!(
                "Channel id '{cid}' must have the form 'type:id'"
            ))),
        }
    }

    pub fn kind(&self) -> &str {
        self.0.split_once(':').map_or("", |(kind, _)| kind)
    }

    pub fn id(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, id)| id)
    }
}

impl MemberId {
    pub fn from_parts(cid: &ChannelId, user_id: &UserId) -> Self {
        Self(format!("{cid}/{user_id}"))
    }
}

impl ReactionId {
    pub fn from_parts(message_id: &MessageId, user_id: &UserId, kind: &str) -> Self {
        Self(format!("{message_id}/{user_id}/{kind}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_parts() {
        let cid = ChannelId::from_parts("messaging", "general");
        assert_eq!(cid.as_str(), "messaging:general");
        assert_eq!(cid.kind(), "messaging");
        assert_eq!(cid.id(), "general");
    }

    #[test]
    fn channel_id_parse_validates_shape() {
        assert!(ChannelId::parse("messaging:general").is_ok());
        let err = ChannelId::parse("general").unwrap_err();
        assert_eq!(err.code_str(), "chat-state/invalid-argument");
        assert!(ChannelId::parse(":x").is_err());
    }

    #[test]
    fn composite_ids() {
        let cid = ChannelId::from_parts("team", "a");
        let user = UserId::new("u1");
        assert_eq!(MemberId::from_parts(&cid, &user).as_str(), "team:a/u1");
        let message = MessageId::new("m1");
        assert_eq!(
            ReactionId::from_parts(&message, &user, "like").as_str(),
            "m1/u1/like"
        );
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&UserId::new("u1")).unwrap();
        assert_eq!(json, "\"u1\"");
    }
}
