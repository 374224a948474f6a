//! Entry point of the crate: a [`ChatClient`] owns the local store, the event
//! feed and the consumption context, and hands out facades sharing them.

mod config;

use std::sync::Arc;

pub use config::ChatClientConfig;

use crate::logger;
use crate::state::api::{
    ChannelList, Chat, Environment, MemberList, MessageSearch, ReactionList, UserList, UserSearch,
};
use crate::state::error::StateResult;
use crate::state::events::EventFeed;
use crate::state::linking::LinkFilter;
use crate::state::model::{ChannelId, ChatChannel};
use crate::state::observer::ConsumptionContext;
use crate::state::query::{
    ChannelListQuery, ChannelMemberListQuery, ReactionListQuery, UserListQuery,
};
use crate::state::remote::RemoteService;
use crate::state::store::MemoryStore;

/// Handle to one chat session. Cloning is cheap; clones share the same store.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Environment>,
}

impl ChatClient {
    /// Validates `config` and builds an empty store fed by `remote`.
    pub fn new(config: ChatClientConfig, remote: Arc<dyn RemoteService>) -> StateResult<Self> {
        config.validate()?;
        if let Some(level) = config.parsed_log_level()? {
            logger::set_log_level(level);
        }
        let store = Arc::new(MemoryStore::new());
        let events = EventFeed::new(Arc::clone(&store));
        let context = ConsumptionContext::from_mode(config.delivery);
        Ok(Self {
            inner: Arc::new(Environment {
                store,
                remote,
                events,
                context,
                config: Arc::new(config),
            }),
        })
    }

    pub fn config(&self) -> &ChatClientConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.inner.store
    }

    /// Where realtime events enter the state layer.
    pub fn events(&self) -> &EventFeed {
        &self.inner.events
    }

    pub fn remote(&self) -> &Arc<dyn RemoteService> {
        &self.inner.remote
    }

    /// A channel list whose membership follows the query's filter locally.
    pub fn make_channel_list(&self, query: ChannelListQuery) -> ChannelList {
        let filter = ChannelList::query_filter(&query);
        ChannelList::new(&self.inner, query, filter)
    }

    /// A channel list whose membership is decided by `filter`.
    pub fn make_channel_list_with_filter(
        &self,
        query: ChannelListQuery,
        filter: LinkFilter<ChatChannel>,
    ) -> ChannelList {
        ChannelList::new(&self.inner, query, filter)
    }

    pub fn make_chat(&self, cid: ChannelId) -> Chat {
        Chat::new(&self.inner, cid)
    }

    pub fn make_member_list(&self, query: ChannelMemberListQuery) -> MemberList {
        MemberList::new(&self.inner, query)
    }

    pub fn make_reaction_list(&self, query: ReactionListQuery) -> ReactionList {
        ReactionList::new(&self.inner, query)
    }

    pub fn make_user_list(&self, query: UserListQuery) -> UserList {
        UserList::new(&self.inner, query)
    }

    pub fn make_message_search(&self) -> MessageSearch {
        MessageSearch::new(&self.inner)
    }

    pub fn make_user_search(&self) -> UserSearch {
        UserSearch::new(&self.inner)
    }

    /// Resolves once every published-state update queued so far has been applied.
    pub async fn flush(&self) {
        self.inner.context.flush().await;
    }

    /// Clears the local store, e.g. on logout. Lists empty out and their
    /// pagination starts over.
    pub async fn remove_all_data(&self) -> StateResult<()> {
        self.inner.store.remove_all_data().await
    }
}
