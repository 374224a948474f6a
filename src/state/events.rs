use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use async_lock::Mutex as AsyncMutex;
use serde::{Deserialize, Serialize};

use crate::state::error::StateResult;
use crate::state::logger::EVENTS_LOGGER;
use crate::state::model::{
    ChannelId, ChannelMember, ChatChannel, ChatMessage, ChatUser, Entity, MessageReaction,
};
use crate::state::store::{MemoryStore, StoreSession};

/// Domain event pushed by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "channel.updated")]
    ChannelUpdated { channel: ChatChannel },
    #[serde(rename = "channel.deleted")]
    ChannelDeleted { cid: ChannelId },
    #[serde(rename = "channel.hidden")]
    ChannelHidden { cid: ChannelId },
    #[serde(rename = "channel.visible")]
    ChannelVisible { cid: ChannelId },
    #[serde(rename = "notification.added_to_channel")]
    NotificationAddedToChannel { channel: ChatChannel },
    #[serde(rename = "notification.removed_from_channel")]
    NotificationRemovedFromChannel { cid: ChannelId },
    #[serde(rename = "message.new")]
    MessageNew { message: ChatMessage },
    #[serde(rename = "message.updated")]
    MessageUpdated { message: ChatMessage },
    /// `hard` deletes drop the record, soft deletes keep it with `deleted_at` set.
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        message: ChatMessage,
        #[serde(default)]
        hard: bool,
    },
    #[serde(rename = "reaction.new")]
    ReactionNew { reaction: MessageReaction },
    #[serde(rename = "reaction.updated")]
    ReactionUpdated { reaction: MessageReaction },
    #[serde(rename = "reaction.deleted")]
    ReactionDeleted { reaction: MessageReaction },
    #[serde(rename = "member.added")]
    MemberAdded { member: ChannelMember },
    #[serde(rename = "member.updated")]
    MemberUpdated { member: ChannelMember },
    #[serde(rename = "member.removed")]
    MemberRemoved { member: ChannelMember },
    #[serde(rename = "user.updated")]
    UserUpdated { user: ChatUser },
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::ChannelUpdated { .. } => "channel.updated",
            ChatEvent::ChannelDeleted { .. } => "channel.deleted",
            ChatEvent::ChannelHidden { .. } => "channel.hidden",
            ChatEvent::ChannelVisible { .. } => "channel.visible",
            ChatEvent::NotificationAddedToChannel { .. } => "notification.added_to_channel",
            ChatEvent::NotificationRemovedFromChannel { .. } => {
                "notification.removed_from_channel"
            }
            ChatEvent::MessageNew { .. } => "message.new",
            ChatEvent::MessageUpdated { .. } => "message.updated",
            ChatEvent::MessageDeleted { .. } => "message.deleted",
            ChatEvent::ReactionNew { .. } => "reaction.new",
            ChatEvent::ReactionUpdated { .. } => "reaction.updated",
            ChatEvent::ReactionDeleted { .. } => "reaction.deleted",
            ChatEvent::MemberAdded { .. } => "member.added",
            ChatEvent::MemberUpdated { .. } => "member.updated",
            ChatEvent::MemberRemoved { .. } => "member.removed",
            ChatEvent::UserUpdated { .. } => "user.updated",
        }
    }

    /// The channel the event belongs to, when there is one.
    pub fn cid(&self) -> Option<&ChannelId> {
        match self {
            ChatEvent::ChannelUpdated { channel }
            | ChatEvent::NotificationAddedToChannel { channel } => Some(&channel.cid),
            ChatEvent::ChannelDeleted { cid }
            | ChatEvent::ChannelHidden { cid }
            | ChatEvent::ChannelVisible { cid }
            | ChatEvent::NotificationRemovedFromChannel { cid } => Some(cid),
            ChatEvent::MessageNew { message }
            | ChatEvent::MessageUpdated { message }
            | ChatEvent::MessageDeleted { message, .. } => Some(&message.cid),
            ChatEvent::MemberAdded { member }
            | ChatEvent::MemberUpdated { member }
            | ChatEvent::MemberRemoved { member } => Some(&member.cid),
            ChatEvent::ReactionNew { .. }
            | ChatEvent::ReactionUpdated { .. }
            | ChatEvent::ReactionDeleted { .. }
            | ChatEvent::UserUpdated { .. } => None,
        }
    }

    /// Writes the event payload, and the denormalized fields it affects, into the store.
    pub fn persist(&self, session: &mut StoreSession<'_>) -> StateResult<()> {
        match self {
            ChatEvent::ChannelUpdated { channel }
            | ChatEvent::NotificationAddedToChannel { channel } => session.save(channel),
            ChatEvent::ChannelDeleted { cid } => {
                session.delete::<ChatChannel>(cid);
                Ok(())
            }
            ChatEvent::ChannelHidden { cid } => {
                session.update::<ChatChannel, _>(cid, |channel| channel.is_hidden = true)?;
                Ok(())
            }
            ChatEvent::ChannelVisible { cid } => {
                session.update::<ChatChannel, _>(cid, |channel| channel.is_hidden = false)?;
                Ok(())
            }
            ChatEvent::NotificationRemovedFromChannel { .. } => Ok(()),
            ChatEvent::MessageNew { message } => {
                let is_new = !session.contains::<ChatMessage>(&message.id);
                session.save(message)?;
                if is_new {
                    if let Some(parent_id) = &message.parent_id {
                        session.update::<ChatMessage, _>(parent_id, |parent| {
                            parent.reply_count += 1;
                        })?;
                    }
                }
                if message.is_in_channel_timeline() {
                    session.update::<ChatChannel, _>(&message.cid, |channel| {
                        if channel.last_message_at.map_or(true, |at| at < message.created_at) {
                            channel.last_message_at = Some(message.created_at);
                        }
                    })?;
                }
                Ok(())
            }
            ChatEvent::MessageUpdated { message } => session.save(message),
            ChatEvent::MessageDeleted { message, hard } => {
                if *hard {
                    session.delete::<ChatMessage>(&message.id);
                    Ok(())
                } else {
                    session.save(message)
                }
            }
            ChatEvent::ReactionNew { reaction } => {
                let is_new = !session.contains::<MessageReaction>(&reaction.id());
                session.save(reaction)?;
                if is_new {
                    session.update::<ChatMessage, _>(&reaction.message_id, |message| {
                        *message
                            .reaction_counts
                            .entry(reaction.kind.clone())
                            .or_default() += 1;
                    })?;
                }
                Ok(())
            }
            ChatEvent::ReactionUpdated { reaction } => session.save(reaction),
            ChatEvent::ReactionDeleted { reaction } => {
                if !session.contains::<MessageReaction>(&reaction.id()) {
                    return Ok(());
                }
                session.delete::<MessageReaction>(&reaction.id());
                session.update::<ChatMessage, _>(&reaction.message_id, |message| {
                    if let Some(count) = message.reaction_counts.get_mut(&reaction.kind) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            message.reaction_counts.remove(&reaction.kind);
                        }
                    }
                })?;
                Ok(())
            }
            ChatEvent::MemberAdded { member } => {
                session.save(member)?;
                session.update::<ChatChannel, _>(&member.cid, |channel| {
                    if !channel.has_member(&member.user.id) {
                        channel.member_ids.push(member.user.id.clone());
                        channel.member_count += 1;
                    }
                })?;
                Ok(())
            }
            ChatEvent::MemberUpdated { member } => session.save(member),
            ChatEvent::MemberRemoved { member } => {
                session.delete::<ChannelMember>(&member.id());
                session.update::<ChatChannel, _>(&member.cid, |channel| {
                    if channel.has_member(&member.user.id) {
                        channel.member_ids.retain(|id| id != &member.user.id);
                        channel.member_count = channel.member_count.saturating_sub(1);
                    }
                })?;
                Ok(())
            }
            ChatEvent::UserUpdated { user } => session.save(user),
        }
    }
}

/// Receives every published event inside the transaction that persisted it, so
/// its writes land in the same change set as the event's payload.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, session: &mut StoreSession<'_>, event: &ChatEvent) -> StateResult<()>;
}

/// Ordered stream of server events feeding the store and the registered handlers.
///
/// Publications are serialized: an event is persisted and handed to every handler
/// in one store write before the next one starts.
#[derive(Clone)]
pub struct EventFeed {
    inner: Arc<EventFeedInner>,
}

struct EventFeedInner {
    store: Arc<MemoryStore>,
    handlers: StdMutex<BTreeMap<u64, Arc<dyn EventHandler>>>,
    handler_counter: AtomicU64,
    publishing: AsyncMutex<()>,
}

impl EventFeed {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            inner: Arc::new(EventFeedInner {
                store,
                handlers: StdMutex::new(BTreeMap::new()),
                handler_counter: AtomicU64::new(1),
                publishing: AsyncMutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.inner.store
    }

    /// Persists `event` and runs the handlers in registration order, all in one
    /// transaction.
    ///
    /// Handler failures are logged and do not fail the publication.
    pub async fn publish(&self, event: ChatEvent) -> StateResult<()> {
        let _publishing = self.inner.publishing.lock().await;
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        self.inner
            .store
            .write(|session| {
                event.persist(session)?;
                for handler in &handlers {
                    if let Err(err) = handler.handle(session, &event) {
                        EVENTS_LOGGER.warn(format!(
                            "Event handler failed on {}: {err}",
                            event.event_type()
                        ));
                    }
                }
                Ok(())
            })
            .await
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> EventSubscription {
        let id = self.inner.handler_counter.fetch_add(1, Ordering::SeqCst);
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handler);
        EventSubscription {
            feed: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Keeps a handler registered; dropping it unregisters the handler.
pub struct EventSubscription {
    feed: Weak<EventFeedInner>,
    id: u64,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.upgrade() {
            feed.handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}
