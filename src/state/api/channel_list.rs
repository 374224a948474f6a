use std::sync::Arc;

use crate::state::api::environment::Environment;
use crate::state::api::offset_list::{ListState, OffsetList, PageFetcher};
use crate::state::error::StateResult;
use crate::state::linking::{LinkFilter, ListLinkingCoordinator};
use crate::state::model::ChatChannel;
use crate::state::observer::ChangeStream;
use crate::state::orchestrator::PageLoaded;
use crate::state::published::Published;
use crate::state::query::ChannelListQuery;

pub type ChannelListState = ListState<ChatChannel>;

/// Paginated list of channels matching a [`ChannelListQuery`].
///
/// Membership follows events: with a dynamic filter every channel change is
/// re-evaluated locally, with [`LinkFilter::Static`] only the server's
/// added/removed notifications move channels in or out.
pub struct ChannelList {
    query: ChannelListQuery,
    list: OffsetList<ChatChannel>,
}

impl ChannelList {
    pub(crate) fn new(
        env: &Environment,
        query: ChannelListQuery,
        filter: LinkFilter<ChatChannel>,
    ) -> Self {
        let list_key = query.list_key();
        let page_size = query.page_size.unwrap_or(env.config.channels_page_size);
        let remote = Arc::clone(&env.remote);
        let remote_query = query.clone();
        let fetcher: PageFetcher<ChatChannel> = Arc::new(move |pagination| {
            let remote = Arc::clone(&remote);
            let query = remote_query.clone();
            Box::pin(async move { remote.query_channels(&query, pagination).await })
        });

        let coordinator = ListLinkingCoordinator::new(list_key.clone(), filter);
        let linking = env.events.subscribe(Arc::new(coordinator));
        let list = OffsetList::new(env, list_key, query.sort.clone(), page_size, fetcher)
            .with_linking(linking);
        Self { query, list }
    }

    /// Filter that evaluates the query's own filter against each persisted channel.
    pub(crate) fn query_filter(query: &ChannelListQuery) -> LinkFilter<ChatChannel> {
        let filter = query.filter.clone();
        LinkFilter::dynamic(move |channel: &ChatChannel| filter.matches_entity(channel))
    }

    pub fn query(&self) -> &ChannelListQuery {
        &self.query
    }

    pub fn state(&self) -> &Published<ChannelListState> {
        self.list.state()
    }

    pub fn page_events(&self) -> ChangeStream<PageLoaded<ChatChannel>> {
        self.list.page_events()
    }

    /// Loads the first page, replacing whatever the list held.
    pub async fn get(&self) -> StateResult<Vec<ChatChannel>> {
        self.load_first_page().await
    }

    pub async fn load_first_page(&self) -> StateResult<Vec<ChatChannel>> {
        self.list.load_first_page().await
    }

    /// Loads the next page. `None` uses the list's page size.
    pub async fn load_more(&self, limit: Option<usize>) -> StateResult<Vec<ChatChannel>> {
        self.list.load_more(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::error::StateErrorCode;
    use crate::state::events::ChatEvent;
    use crate::test_support::{channel, environment, remote_service};
    use crate::state::query::Filter;

    #[tokio::test]
    async fn pages_through_the_query_and_tracks_flags() {
        let remote = remote_service();
        remote.seed_channels((0..5).map(|index| channel(&format!("c{index}"), index)));
        let env = environment(remote.clone());
        let query = ChannelListQuery::new(Filter::All).with_page_size(2);
        let list = ChannelList::new(&env, query.clone(), ChannelList::query_filter(&query));

        assert_eq!(list.get().await.unwrap().len(), 2);
        assert_eq!(list.load_more(None).await.unwrap().len(), 2);
        let last = list.load_more(None).await.unwrap();
        assert_eq!(last.len(), 1);

        let state = list.state().get();
        assert_eq!(state.channels().len(), 5);
        assert!(state.has_loaded_all);
        assert!(!state.is_loading);
        assert!(state
            .channels()
            .is_sorted_by(|lhs, rhs| rhs.default_sorting_at().cmp(&lhs.default_sorting_at())));

        let requests = remote.request_count();
        assert_eq!(list.load_more(None).await.unwrap(), last);
        assert_eq!(remote.request_count(), requests);
    }

    #[tokio::test]
    async fn zero_limit_is_rejected_before_any_request() {
        let remote = remote_service();
        let env = environment(remote.clone());
        let query = ChannelListQuery::new(Filter::All);
        let list = ChannelList::new(&env, query.clone(), ChannelList::query_filter(&query));
        let err = list.load_more(Some(0)).await.unwrap_err();
        assert_eq!(err.code, StateErrorCode::InvalidArgument);
        assert_eq!(remote.request_count(), 0);
    }

    #[tokio::test]
    async fn static_lists_follow_server_notifications_only() {
        let remote = remote_service();
        let env = environment(remote.clone());
        let list = ChannelList::new(&env, ChannelListQuery::new(Filter::All), LinkFilter::Static);
        list.get().await.unwrap();

        env.events
            .publish(ChatEvent::ChannelUpdated {
                channel: channel("c9", 9),
            })
            .await
            .unwrap();
        assert!(list.state().get().channels().is_empty());

        env.events
            .publish(ChatEvent::NotificationAddedToChannel {
                channel: channel("c9", 9),
            })
            .await
            .unwrap();
        assert_eq!(list.state().get().channels().len(), 1);
    }
}
