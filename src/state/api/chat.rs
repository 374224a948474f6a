use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::state::api::environment::Environment;
use crate::state::api::message_state::MessageState;
use crate::state::api::message_window::{MessagePaginationFlags, MessageWindow, MessageWindowState};
use crate::state::error::{ensure_positive_limit, invalid_argument, not_found, StateResult};
use crate::state::events::ChatEvent;
use crate::state::model::{
    ChannelId, ChannelMember, ChatChannel, ChatMessage, ChatUser, LocalMessageState, MemberId,
    MessageId, MessageReaction, ReactionId, UserId,
};
use crate::state::observer::{ChangeStream, EntityChange, EntityObserver};
use crate::state::orchestrator::PageLoaded;
use crate::state::pagination_state::{MessageKey, PaginationState};
use crate::state::published::Published;
use crate::state::query::{
    ChannelMemberListQuery, MessageQuery, MessagesPagination, Pagination, ReactionListQuery,
};
use crate::state::remote::Command;
use crate::state::snapshot::Snapshot;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatState {
    pub channel: Option<ChatChannel>,
    /// Loaded messages of the channel timeline, oldest first.
    pub messages: Snapshot<ChatMessage>,
    pub pagination: MessagePaginationFlags,
}

impl MessageWindowState for ChatState {
    fn set_messages(&mut self, messages: Snapshot<ChatMessage>) {
        self.messages = messages;
    }

    fn set_pagination(&mut self, pagination: MessagePaginationFlags) {
        self.pagination = pagination;
    }
}

static LOCAL_MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Id for a message created on this device before the service has seen it.
fn local_message_id(user_id: &UserId) -> MessageId {
    let sequence = LOCAL_MESSAGE_COUNTER.fetch_add(1, Ordering::SeqCst);
    MessageId::new(format!(
        "{user_id}-{}-{sequence}",
        Utc::now().timestamp_millis()
    ))
}

/// One channel: its record, its message timeline and the commands acting on it.
pub struct Chat {
    env: Environment,
    cid: ChannelId,
    window: MessageWindow<ChatState>,
    channel: EntityObserver<ChatChannel>,
}

impl Chat {
    pub(crate) fn new(env: &Environment, cid: ChannelId) -> Self {
        let state = Published::new(ChatState::default());
        let channel =
            EntityObserver::<ChatChannel>::new(&env.store, cid.clone(), env.context.clone());
        let published = state.clone();
        channel.on_change(move |change| {
            let channel = match change {
                EntityChange::Remove(_) => None,
                other => Some(other.item().clone()),
            };
            published.update(|state| state.channel = channel);
        });
        let current = channel.start_observing();
        state.update(|state| state.channel = current);

        let window = MessageWindow::new(env, MessageQuery::Channel(cid.clone()), state);
        Self {
            env: env.clone(),
            cid,
            window,
            channel,
        }
    }

    pub fn cid(&self) -> &ChannelId {
        &self.cid
    }

    pub fn state(&self) -> &Published<ChatState> {
        self.window.state()
    }

    pub fn channel(&self) -> Option<ChatChannel> {
        self.channel.current()
    }

    pub fn messages(&self) -> Snapshot<ChatMessage> {
        self.window.messages()
    }

    pub fn pagination(&self) -> PaginationState<MessageKey> {
        self.window.pagination()
    }

    pub fn page_events(&self) -> ChangeStream<PageLoaded<ChatMessage>> {
        self.window.page_events()
    }

    /// Refreshes the channel record and loads the newest page of messages.
    pub async fn load_first_page(&self) -> StateResult<Vec<ChatMessage>> {
        let channel = self.env.remote.query_channel(&self.cid).await?;
        self.env.store.write(|session| session.save(&channel)).await?;
        self.window.load_first_page().await
    }

    pub async fn load_previous(
        &self,
        before: Option<MessageId>,
        limit: Option<usize>,
    ) -> StateResult<Vec<ChatMessage>> {
        self.window.load_previous(before, limit).await
    }

    pub async fn load_next(
        &self,
        after: Option<MessageId>,
        limit: Option<usize>,
    ) -> StateResult<Vec<ChatMessage>> {
        self.window.load_next(after, limit).await
    }

    pub async fn load_around(
        &self,
        id: MessageId,
        limit: Option<usize>,
    ) -> StateResult<Vec<ChatMessage>> {
        self.window.load_around(id, limit).await
    }

    pub async fn load_messages(
        &self,
        pagination: MessagesPagination,
    ) -> StateResult<Vec<ChatMessage>> {
        self.window.load_messages(pagination).await
    }

    /// Opens the reply thread of a message already known locally.
    pub fn make_message_state(&self, message_id: MessageId) -> StateResult<MessageState> {
        let message = self.local_message(&message_id)?;
        Ok(MessageState::new(&self.env, message))
    }

    /// Fetches a page of members and stores them. The page is not linked to any list.
    pub async fn load_members(&self, pagination: Pagination) -> StateResult<Vec<ChannelMember>> {
        ensure_positive_limit(pagination.page_size, "load_members")?;
        let query = ChannelMemberListQuery::new(self.cid.clone());
        let page = self.env.remote.query_members(&query, pagination).await?;
        self.env
            .store
            .write(|session| session.save_all(&page.items))
            .await?;
        Ok(page.items)
    }

    pub async fn load_reactions(
        &self,
        message_id: MessageId,
        pagination: Pagination,
    ) -> StateResult<Vec<MessageReaction>> {
        ensure_positive_limit(pagination.page_size, "load_reactions")?;
        let query = ReactionListQuery::new(message_id);
        let page = self.env.remote.query_reactions(&query, pagination).await?;
        self.env
            .store
            .write(|session| session.save_all(&page.items))
            .await?;
        Ok(page.items)
    }

    /// Shows the message in the timeline right away, then delivers it. A failed
    /// delivery keeps the message as [`LocalMessageState::SendingFailed`] so it can
    /// be retried with [`resend_message`](Self::resend_message).
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        message_id: Option<MessageId>,
    ) -> StateResult<ChatMessage> {
        let user_id = self.current_user()?;
        let id = message_id.unwrap_or_else(|| local_message_id(&user_id));
        let mut message = ChatMessage::new(id, self.cid.clone(), user_id, text, Utc::now());
        message.local_state = Some(LocalMessageState::Sending);
        self.env
            .events
            .publish(ChatEvent::MessageNew {
                message: message.clone(),
            })
            .await?;
        self.deliver(message).await
    }

    pub async fn resend_message(&self, message_id: MessageId) -> StateResult<ChatMessage> {
        let mut message = self.local_message(&message_id)?;
        if message.local_state != Some(LocalMessageState::SendingFailed) {
            return Err(invalid_argument(format!(
                "Message '{message_id}' is not waiting to be resent"
            )));
        }
        message.local_state = Some(LocalMessageState::Sending);
        self.env
            .events
            .publish(ChatEvent::MessageUpdated {
                message: message.clone(),
            })
            .await?;
        self.deliver(message).await
    }

    async fn deliver(&self, message: ChatMessage) -> StateResult<ChatMessage> {
        match self.env.remote.send_message(&message).await {
            Ok(sent) => {
                self.env
                    .events
                    .publish(ChatEvent::MessageUpdated {
                        message: sent.clone(),
                    })
                    .await?;
                Ok(sent)
            }
            Err(err) => {
                self.set_local_state(&message.id, Some(LocalMessageState::SendingFailed))
                    .await?;
                Err(err)
            }
        }
    }

    /// Edits the text locally, then syncs the edit. A failed sync leaves the edit
    /// in place as [`LocalMessageState::SyncingFailed`].
    pub async fn update_message(
        &self,
        message_id: MessageId,
        text: impl Into<String>,
    ) -> StateResult<ChatMessage> {
        let mut message = self.local_message(&message_id)?;
        message.text = text.into();
        message.updated_at = Utc::now();
        message.local_state = Some(LocalMessageState::Syncing);
        self.env
            .events
            .publish(ChatEvent::MessageUpdated {
                message: message.clone(),
            })
            .await?;

        let mut synced = message;
        synced.local_state = None;
        let command = Command::UpdateMessage {
            message: synced.clone(),
        };
        match self.env.remote.send_command(command).await {
            Ok(()) => {
                self.set_local_state(&message_id, None).await?;
                Ok(synced)
            }
            Err(err) => {
                self.set_local_state(&message_id, Some(LocalMessageState::SyncingFailed))
                    .await?;
                Err(err)
            }
        }
    }

    /// Soft deletes keep the message with `deleted_at` set; hard deletes drop it.
    /// A message the service never received is dropped locally only.
    pub async fn delete_message(&self, message_id: MessageId, hard: bool) -> StateResult<()> {
        let message = self.local_message(&message_id)?;
        if matches!(
            message.local_state,
            Some(LocalMessageState::Sending | LocalMessageState::SendingFailed)
        ) {
            return self
                .env
                .events
                .publish(ChatEvent::MessageDeleted {
                    message,
                    hard: true,
                })
                .await;
        }

        self.set_local_state(&message_id, Some(LocalMessageState::Deleting))
            .await?;
        let command = Command::DeleteMessage {
            message_id: message_id.clone(),
            hard,
        };
        if let Err(err) = self.env.remote.send_command(command).await {
            self.set_local_state(&message_id, Some(LocalMessageState::DeletingFailed))
                .await?;
            return Err(err);
        }
        let Some(mut message) = self.env.store.entity::<ChatMessage>(&message_id)? else {
            return Ok(());
        };
        message.local_state = None;
        if !hard {
            message.deleted_at = Some(Utc::now());
        }
        self.env
            .events
            .publish(ChatEvent::MessageDeleted { message, hard })
            .await
    }

    pub async fn pin_message(&self, message_id: MessageId) -> StateResult<()> {
        self.local_message(&message_id)?;
        self.env
            .remote
            .send_command(Command::PinMessage {
                message_id: message_id.clone(),
            })
            .await?;
        self.update_message_locally(&message_id, |message| {
            message.pinned = true;
            message.pinned_at = Some(Utc::now());
        })
        .await
    }

    pub async fn unpin_message(&self, message_id: MessageId) -> StateResult<()> {
        self.local_message(&message_id)?;
        self.env
            .remote
            .send_command(Command::UnpinMessage {
                message_id: message_id.clone(),
            })
            .await?;
        self.update_message_locally(&message_id, |message| {
            message.pinned = false;
            message.pinned_at = None;
        })
        .await
    }

    /// Fetches a page of pinned messages, most recently pinned first, and stores it.
    /// The timeline window is not affected.
    pub async fn load_pinned_messages(
        &self,
        pagination: Pagination,
    ) -> StateResult<Vec<ChatMessage>> {
        ensure_positive_limit(pagination.page_size, "load_pinned_messages")?;
        let page = self
            .env
            .remote
            .query_pinned_messages(&self.cid, pagination)
            .await?;
        self.env
            .store
            .write(|session| session.save_all(&page.items))
            .await?;
        Ok(page.items)
    }

    pub async fn load_watchers(&self, pagination: Pagination) -> StateResult<Vec<ChatUser>> {
        ensure_positive_limit(pagination.page_size, "load_watchers")?;
        let page = self.env.remote.query_watchers(&self.cid, pagination).await?;
        self.env
            .store
            .write(|session| session.save_all(&page.items))
            .await?;
        Ok(page.items)
    }

    /// Marks every message of the channel as read for the configured user.
    pub async fn mark_read(&self) -> StateResult<()> {
        let user_id = self.current_user()?;
        self.stored_channel()?;
        self.env
            .remote
            .send_command(Command::MarkRead {
                cid: self.cid.clone(),
                user_id,
            })
            .await?;
        let newest = self.messages().last().cloned();
        self.update_channel(|channel| {
            channel.unread_count = 0;
            channel.last_read_at = Some(Utc::now());
            if let Some(newest) = newest {
                channel.last_read_message_id = Some(newest.id);
            }
        })
        .await
    }

    /// Marks `message_id` and every loaded message after it as unread.
    pub async fn mark_unread(&self, message_id: MessageId) -> StateResult<()> {
        let user_id = self.current_user()?;
        self.stored_channel()?;
        let message = self.local_message(&message_id)?;
        self.env
            .remote
            .send_command(Command::MarkUnread {
                cid: self.cid.clone(),
                user_id,
                message_id,
            })
            .await?;

        let from = MessageKey::from(&message);
        let messages = self.messages();
        let unread = messages
            .iter()
            .filter(|loaded| MessageKey::from(*loaded) >= from)
            .count()
            .max(1);
        let last_read = messages
            .iter()
            .filter(|loaded| MessageKey::from(*loaded) < from)
            .last()
            .cloned();
        self.update_channel(|channel| {
            channel.unread_count = u32::try_from(unread).unwrap_or(u32::MAX);
            channel.last_read_at = last_read.as_ref().map(|message| message.created_at);
            channel.last_read_message_id = last_read.map(|message| message.id);
        })
        .await
    }

    pub async fn send_reaction(
        &self,
        message_id: MessageId,
        kind: &str,
    ) -> StateResult<MessageReaction> {
        let user_id = self.current_user()?;
        let reaction = MessageReaction::new(message_id, user_id, kind, Utc::now());
        self.env
            .remote
            .send_command(Command::SendReaction {
                reaction: reaction.clone(),
            })
            .await?;
        self.env
            .events
            .publish(ChatEvent::ReactionNew {
                reaction: reaction.clone(),
            })
            .await?;
        Ok(reaction)
    }

    pub async fn delete_reaction(&self, message_id: MessageId, kind: &str) -> StateResult<()> {
        let user_id = self.current_user()?;
        self.env
            .remote
            .send_command(Command::DeleteReaction {
                message_id: message_id.clone(),
                user_id: user_id.clone(),
                kind: kind.to_owned(),
            })
            .await?;
        let id = ReactionId::from_parts(&message_id, &user_id, kind);
        if let Some(reaction) = self.env.store.entity::<MessageReaction>(&id)? {
            self.env
                .events
                .publish(ChatEvent::ReactionDeleted { reaction })
                .await?;
        }
        Ok(())
    }

    pub async fn ban_member(&self, user_id: UserId) -> StateResult<()> {
        self.env
            .remote
            .send_command(Command::BanMember {
                cid: self.cid.clone(),
                user_id: user_id.clone(),
            })
            .await?;
        self.mark_banned(&user_id, true).await
    }

    pub async fn unban_member(&self, user_id: UserId) -> StateResult<()> {
        self.env
            .remote
            .send_command(Command::UnbanMember {
                cid: self.cid.clone(),
                user_id: user_id.clone(),
            })
            .await?;
        self.mark_banned(&user_id, false).await
    }

    pub async fn mute(&self) -> StateResult<()> {
        self.env
            .remote
            .send_command(Command::MuteChannel {
                cid: self.cid.clone(),
            })
            .await
    }

    pub async fn unmute(&self) -> StateResult<()> {
        self.env
            .remote
            .send_command(Command::UnmuteChannel {
                cid: self.cid.clone(),
            })
            .await
    }

    async fn mark_banned(&self, user_id: &UserId, banned: bool) -> StateResult<()> {
        let id = MemberId::from_parts(&self.cid, user_id);
        if let Some(mut member) = self.env.store.entity::<ChannelMember>(&id)? {
            member.is_banned = banned;
            member.updated_at = Utc::now();
            self.env
                .events
                .publish(ChatEvent::MemberUpdated { member })
                .await?;
        }
        Ok(())
    }

    /// A message of this channel as stored locally.
    fn local_message(&self, message_id: &MessageId) -> StateResult<ChatMessage> {
        match self.env.store.entity::<ChatMessage>(message_id)? {
            Some(message) if message.cid == self.cid => Ok(message),
            _ => Err(not_found(format!(
                "Message '{message_id}' is not loaded in '{}'",
                self.cid
            ))),
        }
    }

    async fn update_message_locally<F>(&self, message_id: &MessageId, mutate: F) -> StateResult<()>
    where
        F: FnOnce(&mut ChatMessage),
    {
        let Some(mut message) = self.env.store.entity::<ChatMessage>(message_id)? else {
            return Ok(());
        };
        mutate(&mut message);
        self.env
            .events
            .publish(ChatEvent::MessageUpdated { message })
            .await
    }

    async fn set_local_state(
        &self,
        message_id: &MessageId,
        state: Option<LocalMessageState>,
    ) -> StateResult<()> {
        self.update_message_locally(message_id, |message| message.local_state = state)
            .await
    }

    fn stored_channel(&self) -> StateResult<ChatChannel> {
        self.env
            .store
            .entity::<ChatChannel>(&self.cid)?
            .ok_or_else(|| not_found(format!("Channel '{}' is not loaded", self.cid)))
    }

    async fn update_channel<F>(&self, mutate: F) -> StateResult<()>
    where
        F: FnOnce(&mut ChatChannel),
    {
        let mut channel = self.stored_channel()?;
        mutate(&mut channel);
        self.env
            .events
            .publish(ChatEvent::ChannelUpdated { channel })
            .await
    }

    fn current_user(&self) -> StateResult<UserId> {
        self.env
            .config
            .user_id
            .clone()
            .ok_or_else(|| invalid_argument("This operation requires a configured user_id"))
    }
}
