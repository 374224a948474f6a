use std::sync::Arc;

use crate::state::api::environment::Environment;
use crate::state::api::offset_list::{ListState, OffsetList, PageFetcher};
use crate::state::error::StateResult;
use crate::state::linking::{LinkFilter, ListLinkingCoordinator};
use crate::state::model::ChannelMember;
use crate::state::observer::ChangeStream;
use crate::state::orchestrator::PageLoaded;
use crate::state::published::Published;
use crate::state::query::ChannelMemberListQuery;

pub type MemberListState = ListState<ChannelMember>;

/// Paginated members of one channel. Member events are matched against the
/// query locally.
pub struct MemberList {
    query: ChannelMemberListQuery,
    list: OffsetList<ChannelMember>,
}

impl MemberList {
    pub(crate) fn new(env: &Environment, query: ChannelMemberListQuery) -> Self {
        let list_key = query.list_key();
        let page_size = query.page_size.unwrap_or(env.config.members_page_size);
        let remote = Arc::clone(&env.remote);
        let remote_query = query.clone();
        let fetcher: PageFetcher<ChannelMember> = Arc::new(move |pagination| {
            let remote = Arc::clone(&remote);
            let query = remote_query.clone();
            Box::pin(async move { remote.query_members(&query, pagination).await })
        });

        let cid = query.cid.clone();
        let filter = query.filter.clone();
        let coordinator = ListLinkingCoordinator::new(
            list_key.clone(),
            LinkFilter::dynamic(move |member: &ChannelMember| {
                member.cid == cid && filter.matches_entity(member)
            }),
        );
        let linking = env.events.subscribe(Arc::new(coordinator));
        let list = OffsetList::new(env, list_key, query.sort.clone(), page_size, fetcher)
            .with_linking(linking);
        Self { query, list }
    }

    pub fn query(&self) -> &ChannelMemberListQuery {
        &self.query
    }

    pub fn state(&self) -> &Published<MemberListState> {
        self.list.state()
    }

    pub fn page_events(&self) -> ChangeStream<PageLoaded<ChannelMember>> {
        self.list.page_events()
    }

    pub async fn get(&self) -> StateResult<Vec<ChannelMember>> {
        self.list.load_first_page().await
    }

    pub async fn load_more(&self, limit: Option<usize>) -> StateResult<Vec<ChannelMember>> {
        self.list.load_more(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::events::ChatEvent;
    use crate::state::model::ChannelId;
    use crate::state::query::Filter;
    use crate::test_support::{environment, member, remote_service};

    #[tokio::test]
    async fn member_events_respect_the_query_filter() {
        let remote = remote_service();
        let cid = ChannelId::from_parts("messaging", "general");
        remote.seed_members([member(&cid, "u1", 1)]);
        let env = environment(remote);
        let query = ChannelMemberListQuery::new(cid.clone())
            .with_filter(Filter::equal("channel_role", "channel_member"));
        let list = MemberList::new(&env, query);
        assert_eq!(list.get().await.unwrap().len(), 1);

        let mut moderator = member(&cid, "u2", 2);
        moderator.channel_role = "channel_moderator".into();
        env.events
            .publish(ChatEvent::MemberAdded { member: moderator })
            .await
            .unwrap();
        env.events
            .publish(ChatEvent::MemberAdded {
                member: member(&cid, "u3", 3),
            })
            .await
            .unwrap();
        let other = ChannelId::from_parts("messaging", "other");
        env.events
            .publish(ChatEvent::MemberAdded {
                member: member(&other, "u4", 4),
            })
            .await
            .unwrap();

        let users: Vec<String> = list
            .state()
            .get()
            .members()
            .iter()
            .map(|member| member.user.id.to_string())
            .collect();
        assert_eq!(users, ["u1", "u3"]);

        env.events
            .publish(ChatEvent::MemberRemoved {
                member: member(&cid, "u1", 1),
            })
            .await
            .unwrap();
        assert_eq!(list.state().get().members().len(), 1);
    }
}
