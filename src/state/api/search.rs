use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use crate::state::api::environment::Environment;
use crate::state::api::offset_list::PageFetcher;
use crate::state::error::{ensure_positive_limit, invalid_argument, StateErrorCode, StateResult};
use crate::state::logger::SEARCH_LOGGER;
use crate::state::model::{ChatMessage, ChatUser, Entity};
use crate::state::observer::{ChangeStream, ListObserver};
use crate::state::orchestrator::{PageFeed, PageLoaded, PaginatedFetchOrchestrator};
use crate::state::pagination_state::{DisplayOrder, ListPosition, LoadDirection};
use crate::state::published::Published;
use crate::state::query::{
    FetchSpecification, ListKey, MessageSearchQuery, Pagination, Sorting, UserListQuery,
    UserSearchQuery,
};
use crate::state::snapshot::Snapshot;

/// Published state of a search facade.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchState<T: Entity, Q> {
    /// The query of the most recent search.
    pub query: Option<Q>,
    pub results: Snapshot<T>,
    pub has_loaded_all: bool,
    pub is_loading: bool,
}

impl<T: Entity, Q> Default for SearchState<T, Q> {
    fn default() -> Self {
        Self {
            query: None,
            results: Snapshot::empty(),
            has_loaded_all: false,
            is_loading: false,
        }
    }
}

pub type MessageSearchState = SearchState<ChatMessage, MessageSearchQuery>;
pub type UserSearchState = SearchState<ChatUser, UserSearchQuery>;

/// One `search` invocation and everything it owns. Replaced wholesale by the next one.
struct SearchRun<T: Entity> {
    token: u64,
    orchestrator: PaginatedFetchOrchestrator<T, ListPosition>,
    _observer: ListObserver<T>,
    fetcher: PageFetcher<T>,
    page_size: usize,
}

/// Shared machinery of the search facades.
///
/// Every search takes the next correlation token. Pages are only committed
/// while their token is still the latest, so a search overtaken by a newer one
/// resolves with a `superseded` error and never touches the results.
struct SearchEngine<T: Entity, Q> {
    env: Environment,
    kind: &'static str,
    latest: Arc<AtomicU64>,
    current: StdMutex<Option<Arc<SearchRun<T>>>>,
    state: Published<SearchState<T, Q>>,
    pages: Arc<PageFeed<T>>,
}

impl<T, Q> SearchEngine<T, Q>
where
    T: Entity,
    Q: Clone + Send + Sync + 'static,
{
    fn new(env: &Environment, kind: &'static str) -> Self {
        Self {
            env: env.clone(),
            kind,
            latest: Arc::new(AtomicU64::new(0)),
            current: StdMutex::new(None),
            state: Published::new(SearchState::default()),
            pages: Arc::new(PageFeed::new()),
        }
    }

    fn current(&self) -> Option<Arc<SearchRun<T>>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Makes a new run current and returns it with the run it replaced.
    fn start(
        &self,
        query: Q,
        list: ListKey,
        sort: Vec<Sorting<T::SortKey>>,
        page_size: usize,
        fetcher: PageFetcher<T>,
    ) -> (Arc<SearchRun<T>>, Option<Arc<SearchRun<T>>>) {
        let token = self.latest.fetch_add(1, Ordering::SeqCst) + 1;

        let observer = ListObserver::<T>::new(
            &self.env.store,
            FetchSpecification::linked(list.clone(), sort),
            self.env.context.clone(),
            self.env.config.diff,
        );
        let published = self.state.clone();
        let latest = Arc::clone(&self.latest);
        observer.on_change(move |update| {
            if latest.load(Ordering::SeqCst) != token {
                return;
            }
            let snapshot = update.snapshot.clone();
            published.update(|state| state.results = snapshot);
        });
        let (initial, _) = observer.start_observing();

        let orchestrator = PaginatedFetchOrchestrator::new(
            Arc::clone(&self.env.store),
            list,
            DisplayOrder::NewestFirst,
            |position, _: &T| ListPosition(position),
        )
        .with_page_feed(Arc::clone(&self.pages));
        let published = self.state.clone();
        let latest = Arc::clone(&self.latest);
        let context = self.env.context.clone();
        orchestrator.on_state_change(move |pagination| {
            if latest.load(Ordering::SeqCst) != token {
                return;
            }
            let has_loaded_all = pagination.has_loaded_all_older;
            let is_loading = pagination.is_loading();
            let published = published.clone();
            context.dispatch(move || {
                published.update(|state| {
                    state.has_loaded_all = has_loaded_all;
                    state.is_loading = is_loading;
                });
            });
        });

        let run = Arc::new(SearchRun {
            token,
            orchestrator,
            _observer: observer,
            fetcher,
            page_size,
        });
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&run));
        let published = self.state.clone();
        self.env.dispatch(move || {
            published.update(|state| {
                state.query = Some(query);
                state.results = initial;
                state.has_loaded_all = false;
                state.is_loading = false;
            });
        });
        (run, previous)
    }

    async fn search(
        &self,
        query: Q,
        list: ListKey,
        sort: Vec<Sorting<T::SortKey>>,
        page_size: usize,
        fetcher: PageFetcher<T>,
    ) -> StateResult<Vec<T>> {
        let page_size = ensure_positive_limit(page_size, "search")?;
        let (run, previous) = self.start(query, list, sort, page_size, fetcher);
        // The replaced run can no longer commit, so its links are dropped for good.
        if let Some(previous) = previous {
            let stale = previous.orchestrator.list();
            if stale != run.orchestrator.list() {
                self.env
                    .store
                    .write(|session| {
                        session.unlink_all(stale);
                        Ok(())
                    })
                    .await?;
            }
        }
        self.load(&run, LoadDirection::FirstPage, run.page_size)
            .await
    }

    async fn load_more(&self, limit: Option<usize>) -> StateResult<Vec<T>> {
        let Some(run) = self.current() else {
            return Err(invalid_argument(format!(
                "Call search before loading more {} results",
                self.kind
            )));
        };
        let limit = ensure_positive_limit(limit.unwrap_or(run.page_size), "load_more")?;
        self.load(&run, LoadDirection::Older, limit).await
    }

    async fn load(
        &self,
        run: &SearchRun<T>,
        direction: LoadDirection,
        limit: usize,
    ) -> StateResult<Vec<T>> {
        let fetcher = Arc::clone(&run.fetcher);
        let latest = Arc::clone(&self.latest);
        let token = run.token;
        let outcome = run
            .orchestrator
            .fetch_checked(
                direction,
                limit,
                move |offset| fetcher(Pagination::new(limit).with_offset(offset)),
                move || latest.load(Ordering::SeqCst) == token,
            )
            .await;
        match outcome {
            Ok(outcome) => Ok(outcome.into_items()),
            Err(err) => {
                if err.code == StateErrorCode::Superseded {
                    SEARCH_LOGGER.warn(format!(
                        "Discarded {} results of {} search #{token}",
                        direction.as_str(),
                        self.kind
                    ));
                }
                Err(err)
            }
        }
    }
}

/// Searches messages across the channels matching a channel filter.
pub struct MessageSearch {
    engine: SearchEngine<ChatMessage, MessageSearchQuery>,
}

impl MessageSearch {
    pub(crate) fn new(env: &Environment) -> Self {
        Self {
            engine: SearchEngine::new(env, "message"),
        }
    }

    pub fn state(&self) -> &Published<MessageSearchState> {
        &self.engine.state
    }

    pub fn results(&self) -> Snapshot<ChatMessage> {
        self.engine.state.get().results
    }

    /// Page notifications of whichever search is current.
    pub fn page_events(&self) -> ChangeStream<PageLoaded<ChatMessage>> {
        self.engine.pages.subscribe()
    }

    /// Starts a new search, superseding any search still in flight.
    pub async fn search(&self, query: MessageSearchQuery) -> StateResult<Vec<ChatMessage>> {
        let page_size = query
            .page_size
            .unwrap_or(self.engine.env.config.search_page_size);
        let list = ListKey::derived("message-search", &query);
        let remote = Arc::clone(&self.engine.env.remote);
        let remote_query = query.clone();
        let fetcher: PageFetcher<ChatMessage> = Arc::new(move |pagination| {
            let remote = Arc::clone(&remote);
            let query = remote_query.clone();
            Box::pin(async move { remote.search_messages(&query, pagination).await })
        });
        let sort = query.sort.clone();
        self.engine
            .search(query, list, sort, page_size, fetcher)
            .await
    }

    pub async fn load_more(&self, limit: Option<usize>) -> StateResult<Vec<ChatMessage>> {
        self.engine.load_more(limit).await
    }
}

/// Searches users by a name or id prefix.
pub struct UserSearch {
    engine: SearchEngine<ChatUser, UserSearchQuery>,
}

impl UserSearch {
    pub(crate) fn new(env: &Environment) -> Self {
        Self {
            engine: SearchEngine::new(env, "user"),
        }
    }

    pub fn state(&self) -> &Published<UserSearchState> {
        &self.engine.state
    }

    pub fn results(&self) -> Snapshot<ChatUser> {
        self.engine.state.get().results
    }

    pub fn page_events(&self) -> ChangeStream<PageLoaded<ChatUser>> {
        self.engine.pages.subscribe()
    }

    pub async fn search(&self, query: UserSearchQuery) -> StateResult<Vec<ChatUser>> {
        let page_size = query
            .page_size
            .unwrap_or(self.engine.env.config.search_page_size);
        let list = ListKey::derived("user-search", &query);
        let users = UserListQuery::new(query.effective_filter()).with_sort(query.sort.clone());
        let remote = Arc::clone(&self.engine.env.remote);
        let fetcher: PageFetcher<ChatUser> = Arc::new(move |pagination| {
            let remote = Arc::clone(&remote);
            let users = users.clone();
            Box::pin(async move { remote.query_users(&users, pagination).await })
        });
        let sort = query.sort.clone();
        self.engine
            .search(query, list, sort, page_size, fetcher)
            .await
    }

    pub async fn load_more(&self, limit: Option<usize>) -> StateResult<Vec<ChatUser>> {
        self.engine.load_more(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::query::Filter;
    use crate::test_support::{channel, environment, message, remote_service, user};

    fn text_message(id: &str, millis: i64, text: &str) -> ChatMessage {
        let mut message = message("general", id, millis);
        message.text = text.to_owned();
        message
    }

    #[tokio::test]
    async fn message_search_pages_through_results() {
        let remote = remote_service();
        remote.seed_channels([channel("general", 1)]);
        remote.seed_messages([
            text_message("m1", 100, "hello world"),
            text_message("m2", 200, "hello there"),
            text_message("m3", 300, "goodbye"),
        ]);
        let env = environment(remote);
        let search = MessageSearch::new(&env);
        let pages = search.page_events();

        let query = MessageSearchQuery::text(Filter::All, "hello").with_page_size(1);
        let first = search.search(query.clone()).await.unwrap();
        assert_eq!(first[0].id.as_str(), "m2");
        assert_eq!(pages.try_next().unwrap().direction, LoadDirection::FirstPage);

        let more = search.load_more(None).await.unwrap();
        assert_eq!(more[0].id.as_str(), "m1");

        let state = search.state().get();
        assert_eq!(state.query, Some(query));
        assert_eq!(state.results.len(), 2);
        assert_eq!(state.results.first().unwrap().id.as_str(), "m2");
    }

    #[tokio::test]
    async fn newer_search_supersedes_in_flight_one() {
        let remote = remote_service();
        remote.seed_channels([channel("general", 1)]);
        remote.seed_messages([
            text_message("m1", 100, "hello world"),
            text_message("m2", 200, "goodbye"),
        ]);
        let env = environment(Arc::clone(&remote));
        let search = MessageSearch::new(&env);

        let pause = remote.pause().await;
        let release = async move {
            tokio::task::yield_now().await;
            drop(pause);
        };
        let (first, second, ()) = tokio::join!(
            search.search(MessageSearchQuery::text(Filter::All, "hello")),
            search.search(MessageSearchQuery::text(Filter::All, "goodbye")),
            release,
        );

        assert_eq!(first.unwrap_err().code, StateErrorCode::Superseded);
        assert_eq!(second.unwrap().len(), 1);
        let state = search.state().get();
        assert_eq!(state.results.len(), 1);
        assert_eq!(state.results.first().unwrap().id.as_str(), "m2");
        assert_eq!(remote.request_count(), 2);
    }

    #[tokio::test]
    async fn user_search_matches_names_and_ids() {
        let remote = remote_service();
        remote.seed_users([user("u1", "Ada"), user("u2", "Adam"), user("u3", "Bob")]);
        let env = environment(remote);
        let search = UserSearch::new(&env);

        let found = search.search(UserSearchQuery::new("ad")).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(search.state().get().has_loaded_all);

        let found = search.search(UserSearchQuery::new("u3")).await.unwrap();
        assert_eq!(found[0].name.as_deref(), Some("Bob"));
        assert_eq!(search.results().len(), 1);
    }

    #[tokio::test]
    async fn repeated_searches_keep_only_the_current_links() {
        let remote = remote_service();
        remote.seed_users((0..6).map(|index| user(&format!("u{index}"), &format!("Ada {index}"))));
        let env = environment(remote);
        let search = UserSearch::new(&env);

        for prefix in ["ad", "u1", "ada", "u", "ad"] {
            let found = search.search(UserSearchQuery::new(prefix)).await.unwrap();
            assert_eq!(env.store.link_count(), found.len(), "after searching {prefix}");
        }

        let query = UserSearchQuery::new("u").with_page_size(2);
        search.search(query).await.unwrap();
        search.load_more(None).await.unwrap();
        assert_eq!(env.store.link_count(), 4);
        search.search(UserSearchQuery::new("u5")).await.unwrap();
        assert_eq!(env.store.link_count(), 1);
    }

    #[tokio::test]
    async fn load_more_requires_a_search() {
        let env = environment(remote_service());
        let search = UserSearch::new(&env);
        let err = search.load_more(None).await.unwrap_err();
        assert_eq!(err.code, StateErrorCode::InvalidArgument);

        let err = search
            .search(UserSearchQuery::new("a").with_page_size(0))
            .await
            .unwrap_err();
        assert_eq!(err.code, StateErrorCode::InvalidArgument);
    }
}
