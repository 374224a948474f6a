//! Fixtures shared by the crate's unit tests.

use std::sync::Arc;

use crate::client::ChatClientConfig;
use crate::state::api::Environment;
use crate::state::events::EventFeed;
use crate::state::model::timestamps::from_millis;
use crate::state::model::{
    ChannelId, ChannelMember, ChatChannel, ChatMessage, ChatUser, MessageId, MessageReaction,
    UserId,
};
use crate::state::observer::ConsumptionContext;
use crate::state::remote::InMemoryRemoteService;
use crate::state::store::MemoryStore;

pub fn remote_service() -> Arc<InMemoryRemoteService> {
    Arc::new(InMemoryRemoteService::new())
}

/// A fresh store wired to `remote`, delivering state updates inline.
pub(crate) fn environment(remote: Arc<InMemoryRemoteService>) -> Environment {
    environment_with_config(remote, ChatClientConfig::default())
}

pub(crate) fn environment_with_user(
    remote: Arc<InMemoryRemoteService>,
    user_id: &str,
) -> Environment {
    environment_with_config(
        remote,
        ChatClientConfig::default().with_user(UserId::new(user_id)),
    )
}

fn environment_with_config(
    remote: Arc<InMemoryRemoteService>,
    config: ChatClientConfig,
) -> Environment {
    let store = Arc::new(MemoryStore::new());
    Environment {
        events: EventFeed::new(Arc::clone(&store)),
        store,
        remote,
        context: ConsumptionContext::immediate(),
        config: Arc::new(config),
    }
}

/// Channel `messaging:{id}` created `index` seconds after the epoch.
pub fn channel(id: &str, index: i64) -> ChatChannel {
    ChatChannel::new(
        ChannelId::from_parts("messaging", id),
        from_millis(index * 1000),
    )
}

pub fn message(channel_id: &str, id: &str, millis: i64) -> ChatMessage {
    ChatMessage::new(
        MessageId::new(id),
        ChannelId::from_parts("messaging", channel_id),
        UserId::new("author"),
        format!("text of {id}"),
        from_millis(millis),
    )
}

/// A thread reply to `parent`, kept out of the channel timeline.
pub fn reply(parent: &ChatMessage, id: &str, millis: i64) -> ChatMessage {
    let mut reply = ChatMessage::new(
        MessageId::new(id),
        parent.cid.clone(),
        UserId::new("author"),
        format!("reply {id}"),
        from_millis(millis),
    );
    reply.parent_id = Some(parent.id.clone());
    reply
}

pub fn user(id: &str, name: &str) -> ChatUser {
    let mut user = ChatUser::new(UserId::new(id), from_millis(0));
    user.name = Some(name.to_owned());
    user
}

pub fn member(cid: &ChannelId, user_id: &str, millis: i64) -> ChannelMember {
    ChannelMember::new(cid.clone(), user(user_id, user_id), from_millis(millis))
}

pub fn reaction(message_id: &MessageId, user_id: &str, millis: i64) -> MessageReaction {
    MessageReaction::new(
        message_id.clone(),
        UserId::new(user_id),
        "like",
        from_millis(millis),
    )
}
