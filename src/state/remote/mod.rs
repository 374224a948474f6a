//! The remote chat service consumed by the state layer.

mod in_memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::error::StateResult;
use crate::state::model::{
    ChannelId, ChannelMember, ChatChannel, ChatMessage, ChatUser, MessageId, MessageReaction,
    UserId,
};
use crate::state::pagination_state::PageEdges;
use crate::state::query::{
    ChannelListQuery, ChannelMemberListQuery, MessageQuery, MessageSearchQuery,
    MessagesPagination, Pagination, ReactionListQuery, UserListQuery,
};

pub use in_memory::{InMemoryRemoteService, RemotePause, RemoteRequest};

/// One page returned by the remote service.
#[derive(Clone, Debug, PartialEq)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    /// Opaque continuation token, when the service hands one out.
    pub next_cursor: Option<String>,
    pub edges: PageEdges,
}

impl<T> PageResult<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
            edges: PageEdges::default(),
        }
    }

    pub fn with_edges(mut self, edges: PageEdges) -> Self {
        self.edges = edges;
        self
    }
}

/// Mutations the facades forward to the service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SendReaction {
        reaction: MessageReaction,
    },
    DeleteReaction {
        message_id: MessageId,
        user_id: UserId,
        kind: String,
    },
    BanMember {
        cid: ChannelId,
        user_id: UserId,
    },
    UnbanMember {
        cid: ChannelId,
        user_id: UserId,
    },
    MuteChannel {
        cid: ChannelId,
    },
    UnmuteChannel {
        cid: ChannelId,
    },
    /// Replaces the text of a message already known to the service.
    UpdateMessage {
        message: ChatMessage,
    },
    DeleteMessage {
        message_id: MessageId,
        hard: bool,
    },
    PinMessage {
        message_id: MessageId,
    },
    UnpinMessage {
        message_id: MessageId,
    },
    MarkRead {
        cid: ChannelId,
        user_id: UserId,
    },
    /// Marks `message_id` and everything after it as unread.
    MarkUnread {
        cid: ChannelId,
        user_id: UserId,
        message_id: MessageId,
    },
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RemoteService: Send + Sync + 'static {
    async fn query_channels(
        &self,
        query: &ChannelListQuery,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChatChannel>>;

    async fn query_channel(&self, cid: &ChannelId) -> StateResult<ChatChannel>;

    /// Messages of a channel timeline or a thread, oldest first within the page.
    async fn query_messages(
        &self,
        query: &MessageQuery,
        pagination: &MessagesPagination,
    ) -> StateResult<PageResult<ChatMessage>>;

    async fn query_members(
        &self,
        query: &ChannelMemberListQuery,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChannelMember>>;

    async fn query_reactions(
        &self,
        query: &ReactionListQuery,
        pagination: Pagination,
    ) -> StateResult<PageResult<MessageReaction>>;

    async fn query_users(
        &self,
        query: &UserListQuery,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChatUser>>;

    async fn search_messages(
        &self,
        query: &MessageSearchQuery,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChatMessage>>;

    /// Delivers a locally created message and returns it as the service stored it.
    async fn send_message(&self, message: &ChatMessage) -> StateResult<ChatMessage>;

    /// Pinned messages of a channel, most recently pinned first.
    async fn query_pinned_messages(
        &self,
        cid: &ChannelId,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChatMessage>>;

    async fn query_watchers(
        &self,
        cid: &ChannelId,
        pagination: Pagination,
    ) -> StateResult<PageResult<ChatUser>>;

    async fn send_command(&self, command: Command) -> StateResult<()>;
}
