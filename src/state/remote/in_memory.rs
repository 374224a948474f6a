use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_lock::{RwLock as AsyncRwLock, RwLockWriteGuardArc};
use async_trait::async_trait;
use chrono::Utc;

use crate::platform::runtime::sleep;
use crate::state::error::{invalid_argument, not_found, StateError, StateResult};
use crate::state::model::{
    ChannelId, ChannelMember, ChatChannel, ChatMessage, ChatUser, Entity, MemberId, MessageId,
    MessageReaction, MessageSortingKey, ReactionId, UserId, UserListSortingKey,
};
use crate::state::pagination_state::{MessageKey, PageEdges};
use crate::state::query::{
    compare_entities, ChannelListQuery, ChannelMemberListQuery, MessageQuery, MessageSearchQuery,
    MessagesPagination, Pagination, PaginationParameter, ReactionListQuery, Sorting,
    UserListQuery,
};

use super::{Command, PageResult, RemoteService};

/// A request as received by [`InMemoryRemoteService`], in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteRequest {
    Channels { pagination: Pagination },
    Channel { cid: ChannelId },
    Messages {
        query: MessageQuery,
        pagination: MessagesPagination,
    },
    Members { pagination: Pagination },
    Reactions { pagination: Pagination },
    Users { pagination: Pagination },
    SearchMessages { pagination: Pagination },
    SendMessage { message_id: MessageId },
    PinnedMessages { cid: ChannelId, pagination: Pagination },
    Watchers { cid: ChannelId, pagination: Pagination },
    Command(Command),
}

#[derive(Default)]
struct RemoteData {
    channels: BTreeMap<ChannelId, ChatChannel>,
    messages: BTreeMap<MessageId, ChatMessage>,
    members: BTreeMap<MemberId, ChannelMember>,
    reactions: BTreeMap<ReactionId, MessageReaction>,
    users: BTreeMap<UserId, ChatUser>,
    muted: BTreeSet<ChannelId>,
    watchers: BTreeMap<ChannelId, BTreeSet<UserId>>,
    /// First unread message per channel and user; `None` once read up to the end.
    unread_from: BTreeMap<(ChannelId, UserId), Option<MessageId>>,
}

/// Remote service answering from seeded in-memory data.
///
/// Requests are logged, can be held back with [`InMemoryRemoteService::pause`],
/// delayed with a fixed latency, or failed with queued errors.
pub struct InMemoryRemoteService {
    data: StdMutex<RemoteData>,
    requests: StdMutex<Vec<RemoteRequest>>,
    failures: StdMutex<VecDeque<StateError>>,
    latency: StdMutex<Duration>,
    gate: Arc<AsyncRwLock<()>>,
}

/// Holds every request at the service's door until dropped.
pub struct RemotePause {
    _guard: RwLockWriteGuardArc<()>,
}

impl Default for InMemoryRemoteService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteService {
    pub fn new() -> Self {
        Self {
            data: StdMutex::new(RemoteData::default()),
            requests: StdMutex::new(Vec::new()),
            failures: StdMutex::new(VecDeque::new()),
            latency: StdMutex::new(Duration::ZERO),
            gate: Arc::new(AsyncRwLock::new(())),
        }
    }

    fn data(&self) -> MutexGuard<'_, RemoteData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seed_channels(&self, channels: impl IntoIterator<Item = ChatChannel>) {
        let mut data = self.data();
        for channel in channels {
            data.channels.insert(channel.cid.clone(), channel);
        }
    }

    pub fn seed_messages(&self, messages: impl IntoIterator<Item = ChatMessage>) {
        let mut data = self.data();
        for message in messages {
            data.messages.insert(message.id.clone(), message);
        }
    }

    pub fn seed_members(&self, members: impl IntoIterator<Item = ChannelMember>) {
        let mut data = self.data();
        for member in members {
            data.members.insert(member.id(), member);
        }
    }

    pub fn seed_reactions(&self, reactions: impl IntoIterator<Item = MessageReaction>) {
        let mut data = self.data();
        for reaction in reactions {
            data.reactions.insert(reaction.id(), reaction);
        }
    }

    pub fn seed_users(&self, users: impl IntoIterator<Item = ChatUser>) {
        let mut data = self.data();
        for user in users {
            data.users.insert(user.id.clone(), user);
        }
    }

    /// Registers `users` as watching `cid`.
    pub fn seed_watchers(&self, cid: &ChannelId, users: impl IntoIterator<Item = ChatUser>) {
        let mut data = self.data();
        for user in users {
            data.watchers
                .entry(cid.clone())
                .or_default()
                .insert(user.id.clone());
            data.users.insert(user.id.clone(), user);
        }
    }

    pub fn message(&self, id: &MessageId) -> Option<ChatMessage> {
        self.data().messages.get(id).cloned()
    }

    /// The read mark of `user_id` in `cid`: `Some(None)` when everything is read.
    pub fn unread_from(&self, cid: &ChannelId, user_id: &UserId) -> Option<Option<MessageId>> {
        self.data()
            .unread_from
            .get(&(cid.clone(), user_id.clone()))
            .cloned()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_muted(&self, cid: &ChannelId) -> bool {
        self.data().muted.contains(cid)
    }

    /// The next request fails with `error` (after being logged).
    pub fn fail_next(&self, error: StateError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Blocks every request, new or already waiting, until the returned guard is dropped.
    pub async fn pause(&self) -> RemotePause {
        RemotePause {
            _guard: self.gate.write_arc().await,
        }
    }

    async fn enter(&self, request: RemoteRequest) -> StateResult<()> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        drop(self.gate.read().await);
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        sleep(latency).await;
        match self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn set_banned(
    data: &mut RemoteData,
    cid: &ChannelId,
    user_id: &UserId,
    banned: bool,
) -> StateResult<()> {
    let member = data
        .members
        .get_mut(&MemberId::from_parts(cid, user_id))
        .ok_or_else(|| not_found(format!("'{user_id}' is not a member of '{cid}'")))?;
    member.is_banned = banned;
    Ok(())
}

fn message_mut<'a>(
    data: &'a mut RemoteData,
    message_id: &MessageId,
) -> StateResult<&'a mut ChatMessage> {
    data.messages
        .get_mut(message_id)
        .ok_or_else(|| not_found(format!("Message '{message_id}' does not exist")))
}

fn require_channel(data: &RemoteData, cid: &ChannelId) -> StateResult<()> {
    if data.channels.contains_key(cid) {
        Ok(())
    } else {
        Err(not_found(format!("Channel '{cid}' does not exist")))
    }
}

fn offset_page<T: Entity>(
    mut items: Vec<T>,
    sort: &[Sorting<T::SortKey>],
    pagination: Pagination,
) -> StateResult<PageResult<T>> {
    if pagination.page_size == 0 {
        return Err(invalid_argument("page_size must be positive"));
    }
    items.sort_by(|lhs, rhs| compare_entities(sort, lhs, rhs));
    let total = items.len();
    let start = pagination.offset.min(total);
    let end = start.saturating_add(pagination.page_size).min(total);
    let page: Vec<T> = items.drain(start..end).collect();
    Ok(PageResult {
        next_cursor: (end < total).then(|| end.to_string()),
        items: page,
        edges: PageEdges {
            reached_oldest: end >= total,
            reached_newest: start == 0,
        },
    })
}

fn message_page(
    mut timeline: Vec<ChatMessage>,
    pagination: &MessagesPagination,
) -> StateResult<PageResult<ChatMessage>> {
    let size = pagination.page_size;
    if size == 0 {
        return Err(invalid_argument("page_size must be positive"));
    }
    timeline.sort_by_key(|message| MessageKey::from(message));
    let total = timeline.len();
    let position = |id: &MessageId| {
        timeline
            .iter()
            .position(|message| &message.id == id)
            .ok_or_else(|| not_found(format!("Message '{id}' does not exist")))
    };

    let (start, end) = match &pagination.parameter {
        None => (total.saturating_sub(size), total),
        Some(PaginationParameter::LessThan(id)) => {
            let anchor = position(id)?;
            (anchor.saturating_sub(size), anchor)
        }
        Some(PaginationParameter::GreaterThan(id)) => {
            let anchor = position(id)? + 1;
            (anchor, anchor.saturating_add(size).min(total))
        }
        Some(PaginationParameter::Around(id)) => {
            let anchor = position(id)?;
            let start = anchor.saturating_sub(size / 2);
            (start, start.saturating_add(size).min(total))
        }
    };

    let items: Vec<ChatMessage> = timeline.drain(start..end).collect();
    Ok(PageResult {
        next_cursor: None,
        items,
        edges: PageEdges {
            reached_oldest: start == 0,
            reached_newest: end == total,
        },
    })
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RemoteService for InMemoryRemoteService {
    async fn query_channels(
        &self,
        query: &ChannelListQuery,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChatChannel>> {
        self.enter(RemoteRequest::Channels { pagination }).await?;
        let channels = self
            .data()
            .channels
            .values()
            .filter(|channel| query.filter.matches_entity(*channel))
            .cloned()
            .collect();
        offset_page(channels, &query.sort, pagination)
    }

    async fn query_channel(&self, cid: &ChannelId) -> StateResult<ChatChannel> {
        self.enter(RemoteRequest::Channel { cid: cid.clone() })
            .await?;
        self.data()
            .channels
            .get(cid)
            .cloned()
            .ok_or_else(|| not_found(format!("Channel '{cid}' does not exist")))
    }

    async fn query_messages(
        &self,
        query: &MessageQuery,
        pagination: &MessagesPagination,
    ) -> StateResult<PageResult<ChatMessage>> {
        self.enter(RemoteRequest::Messages {
            query: query.clone(),
            pagination: pagination.clone(),
        })
        .await?;
        let timeline = self
            .data()
            .messages
            .values()
            .filter(|message| match query {
                MessageQuery::Channel(cid) => {
                    &message.cid == cid && message.is_in_channel_timeline()
                }
                MessageQuery::Thread { parent_id, .. } => {
                    message.parent_id.as_ref() == Some(parent_id)
                }
            })
            .cloned()
            .collect();
        message_page(timeline, pagination)
    }

    async fn query_members(
        &self,
        query: &ChannelMemberListQuery,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChannelMember>> {
        self.enter(RemoteRequest::Members { pagination }).await?;
        let members = self
            .data()
            .members
            .values()
            .filter(|member| member.cid == query.cid && query.filter.matches_entity(*member))
            .cloned()
            .collect();
        offset_page(members, &query.sort, pagination)
    }

    async fn query_reactions(
        &self,
        query: &ReactionListQuery,
        pagination: Pagination,
    ) -> StateResult<PageResult<MessageReaction>> {
        self.enter(RemoteRequest::Reactions { pagination }).await?;
        let reactions = self
            .data()
            .reactions
            .values()
            .filter(|reaction| {
                reaction.message_id == query.message_id && query.filter.matches_entity(*reaction)
            })
            .cloned()
            .collect();
        offset_page(reactions, &query.sort, pagination)
    }

    async fn query_users(
        &self,
        query: &UserListQuery,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChatUser>> {
        self.enter(RemoteRequest::Users { pagination }).await?;
        let users = self
            .data()
            .users
            .values()
            .filter(|user| query.filter.matches_entity(*user))
            .cloned()
            .collect();
        offset_page(users, &query.sort, pagination)
    }

    async fn search_messages(
        &self,
        query: &MessageSearchQuery,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChatMessage>> {
        self.enter(RemoteRequest::SearchMessages { pagination })
            .await?;
        let data = self.data();
        let messages = data
            .messages
            .values()
            .filter(|message| {
                data.channels
                    .get(&message.cid)
                    .is_some_and(|channel| query.channel_filter.matches_entity(channel))
                    && query.message_filter.matches_entity(*message)
            })
            .cloned()
            .collect();
        drop(data);
        offset_page(messages, &query.sort, pagination)
    }

    async fn send_message(&self, message: &ChatMessage) -> StateResult<ChatMessage> {
        self.enter(RemoteRequest::SendMessage {
            message_id: message.id.clone(),
        })
        .await?;
        let mut data = self.data();
        require_channel(&data, &message.cid)?;
        if let Some(stored) = data.messages.get(&message.id) {
            // Retried sends are idempotent.
            return Ok(stored.clone());
        }
        let mut stored = message.clone();
        stored.local_state = None;
        data.messages.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn query_pinned_messages(
        &self,
        cid: &ChannelId,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChatMessage>> {
        self.enter(RemoteRequest::PinnedMessages {
            cid: cid.clone(),
            pagination,
        })
        .await?;
        let pinned = self
            .data()
            .messages
            .values()
            .filter(|message| &message.cid == cid && message.pinned)
            .cloned()
            .collect();
        offset_page(
            pinned,
            &[Sorting::descending(MessageSortingKey::PinnedAt)],
            pagination,
        )
    }

    async fn query_watchers(
        &self,
        cid: &ChannelId,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChatUser>> {
        self.enter(RemoteRequest::Watchers {
            cid: cid.clone(),
            pagination,
        })
        .await?;
        let data = self.data();
        require_channel(&data, cid)?;
        let watchers = data
            .watchers
            .get(cid)
            .into_iter()
            .flatten()
            .filter_map(|user_id| data.users.get(user_id).cloned())
            .collect();
        drop(data);
        offset_page(
            watchers,
            &[Sorting::ascending(UserListSortingKey::Id)],
            pagination,
        )
    }

    async fn send_command(&self, command: Command) -> StateResult<()> {
        self.enter(RemoteRequest::Command(command.clone())).await?;
        let mut data = self.data();
        match command {
            Command::SendReaction { reaction } => {
                if !data.messages.contains_key(&reaction.message_id) {
                    return Err(not_found(format!(
                        "Message '{}' does not exist",
                        reaction.message_id
                    )));
                }
                data.reactions.insert(reaction.id(), reaction);
            }
            Command::DeleteReaction {
                message_id,
                user_id,
                kind,
            } => {
                data.reactions
                    .remove(&ReactionId::from_parts(&message_id, &user_id, &kind));
            }
            Command::BanMember { cid, user_id } => {
                set_banned(&mut data, &cid, &user_id, true)?;
            }
            Command::UnbanMember { cid, user_id } => {
                set_banned(&mut data, &cid, &user_id, false)?;
            }
            Command::MuteChannel { cid } => {
                data.muted.insert(cid);
            }
            Command::UnmuteChannel { cid } => {
                data.muted.remove(&cid);
            }
            Command::UpdateMessage { message } => {
                let stored = message_mut(&mut data, &message.id)?;
                stored.text = message.text;
                stored.updated_at = message.updated_at;
            }
            Command::DeleteMessage { message_id, hard } => {
                if hard {
                    data.messages
                        .remove(&message_id)
                        .ok_or_else(|| not_found(format!("Message '{message_id}' does not exist")))?;
                } else {
                    message_mut(&mut data, &message_id)?.deleted_at = Some(Utc::now());
                }
            }
            Command::PinMessage { message_id } => {
                let stored = message_mut(&mut data, &message_id)?;
                stored.pinned = true;
                stored.pinned_at = Some(Utc::now());
            }
            Command::UnpinMessage { message_id } => {
                let stored = message_mut(&mut data, &message_id)?;
                stored.pinned = false;
                stored.pinned_at = None;
            }
            Command::MarkRead { cid, user_id } => {
                require_channel(&data, &cid)?;
                data.unread_from.insert((cid, user_id), None);
            }
            Command::MarkUnread {
                cid,
                user_id,
                message_id,
            } => {
                require_channel(&data, &cid)?;
                message_mut(&mut data, &message_id)?;
                data.unread_from.insert((cid, user_id), Some(message_id));
            }
        }
        Ok(())
    }
}
