use std::sync::Arc;

use crate::state::api::environment::Environment;
use crate::state::api::offset_list::{ListState, OffsetList, PageFetcher};
use crate::state::error::StateResult;
use crate::state::linking::{LinkFilter, ListLinkingCoordinator};
use crate::state::model::MessageReaction;
use crate::state::observer::ChangeStream;
use crate::state::orchestrator::PageLoaded;
use crate::state::published::Published;
use crate::state::query::ReactionListQuery;

pub type ReactionListState = ListState<MessageReaction>;

/// Paginated reactions of one message.
pub struct ReactionList {
    query: ReactionListQuery,
    list: OffsetList<MessageReaction>,
}

impl ReactionList {
    pub(crate) fn new(env: &Environment, query: ReactionListQuery) -> Self {
        let list_key = query.list_key();
        let page_size = query.page_size.unwrap_or(env.config.reactions_page_size);
        let remote = Arc::clone(&env.remote);
        let remote_query = query.clone();
        let fetcher: PageFetcher<MessageReaction> = Arc::new(move |pagination| {
            let remote = Arc::clone(&remote);
            let query = remote_query.clone();
            Box::pin(async move { remote.query_reactions(&query, pagination).await })
        });

        let message_id = query.message_id.clone();
        let filter = query.filter.clone();
        let coordinator = ListLinkingCoordinator::new(
            list_key.clone(),
            LinkFilter::dynamic(move |reaction: &MessageReaction| {
                reaction.message_id == message_id && filter.matches_entity(reaction)
            }),
        );
        let linking = env.events.subscribe(Arc::new(coordinator));
        let list = OffsetList::new(env, list_key, query.sort.clone(), page_size, fetcher)
            .with_linking(linking);
        Self { query, list }
    }

    pub fn query(&self) -> &ReactionListQuery {
        &self.query
    }

    pub fn state(&self) -> &Published<ReactionListState> {
        self.list.state()
    }

    pub fn page_events(&self) -> ChangeStream<PageLoaded<MessageReaction>> {
        self.list.page_events()
    }

    pub async fn get(&self) -> StateResult<Vec<MessageReaction>> {
        self.list.load_first_page().await
    }

    pub async fn load_more(&self, limit: Option<usize>) -> StateResult<Vec<MessageReaction>> {
        self.list.load_more(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::events::ChatEvent;
    use crate::state::model::MessageId;
    use crate::test_support::{environment, reaction, remote_service};

    #[tokio::test]
    async fn reactions_are_newest_first_and_follow_events() {
        let remote = remote_service();
        let message_id = MessageId::new("m1");
        remote.seed_reactions((0..4).map(|index| reaction(&message_id, &format!("u{index}"), index)));
        let env = environment(remote);
        let list = ReactionList::new(&env, ReactionListQuery::new(message_id.clone()).with_page_size(3));

        let first = list.get().await.unwrap();
        assert_eq!(first[0].user_id.as_str(), "u3");
        assert_eq!(list.load_more(None).await.unwrap().len(), 1);
        assert!(list.state().get().has_loaded_all);

        env.events
            .publish(ChatEvent::ReactionNew {
                reaction: reaction(&message_id, "u9", 9),
            })
            .await
            .unwrap();
        env.events
            .publish(ChatEvent::ReactionNew {
                reaction: reaction(&MessageId::new("m2"), "u8", 8),
            })
            .await
            .unwrap();
        let state = list.state().get();
        assert_eq!(state.reactions().len(), 5);
        assert_eq!(state.reactions().first().unwrap().user_id.as_str(), "u9");
    }
}
