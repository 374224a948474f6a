use std::sync::Arc;

use crate::state::api::environment::Environment;
use crate::state::api::offset_list::{ListState, OffsetList, PageFetcher};
use crate::state::error::StateResult;
use crate::state::model::ChatUser;
use crate::state::observer::ChangeStream;
use crate::state::orchestrator::PageLoaded;
use crate::state::published::Published;
use crate::state::query::UserListQuery;

pub type UserListState = ListState<ChatUser>;

/// Paginated users matching a [`UserListQuery`]. Membership is whatever the
/// service returned; user updates still refresh the listed entries.
pub struct UserList {
    query: UserListQuery,
    list: OffsetList<ChatUser>,
}

impl UserList {
    pub(crate) fn new(env: &Environment, query: UserListQuery) -> Self {
        let page_size = query.page_size.unwrap_or(env.config.users_page_size);
        let remote = Arc::clone(&env.remote);
        let remote_query = query.clone();
        let fetcher: PageFetcher<ChatUser> = Arc::new(move |pagination| {
            let remote = Arc::clone(&remote);
            let query = remote_query.clone();
            Box::pin(async move { remote.query_users(&query, pagination).await })
        });
        let list = OffsetList::new(env, query.list_key(), query.sort.clone(), page_size, fetcher);
        Self { query, list }
    }

    pub fn query(&self) -> &UserListQuery {
        &self.query
    }

    pub fn state(&self) -> &Published<UserListState> {
        self.list.state()
    }

    pub fn page_events(&self) -> ChangeStream<PageLoaded<ChatUser>> {
        self.list.page_events()
    }

    pub async fn get(&self) -> StateResult<Vec<ChatUser>> {
        self.list.load_first_page().await
    }

    pub async fn load_more(&self, limit: Option<usize>) -> StateResult<Vec<ChatUser>> {
        self.list.load_more(limit).await
    }
}
