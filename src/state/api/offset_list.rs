use std::sync::Arc;

use crate::state::api::environment::{Environment, PageFuture};
use crate::state::error::{ensure_positive_limit, StateResult};
use crate::state::events::EventSubscription;
use crate::state::model::{ChannelMember, ChatChannel, ChatUser, Entity, MessageReaction};
use crate::state::observer::{ChangeStream, ListObserver};
use crate::state::orchestrator::{PageLoaded, PaginatedFetchOrchestrator};
use crate::state::pagination_state::{DisplayOrder, ListPosition, LoadDirection};
use crate::state::published::Published;
use crate::state::query::{FetchSpecification, ListKey, Pagination, Sorting};
use crate::state::snapshot::Snapshot;

pub(crate) type PageFetcher<T> = Arc<dyn Fn(Pagination) -> PageFuture<T> + Send + Sync + 'static>;

/// Published state of an offset-paginated list.
#[derive(Clone, Debug, PartialEq)]
pub struct ListState<T: Entity> {
    pub items: Snapshot<T>,
    /// Every page has been fetched; `load_more` no longer calls the service.
    pub has_loaded_all: bool,
    pub is_loading: bool,
}

impl<T: Entity> Default for ListState<T> {
    fn default() -> Self {
        Self {
            items: Snapshot::empty(),
            has_loaded_all: false,
            is_loading: false,
        }
    }
}

impl ListState<ChatChannel> {
    pub fn channels(&self) -> &Snapshot<ChatChannel> {
        &self.items
    }
}

impl ListState<ChannelMember> {
    pub fn members(&self) -> &Snapshot<ChannelMember> {
        &self.items
    }
}

impl ListState<MessageReaction> {
    pub fn reactions(&self) -> &Snapshot<MessageReaction> {
        &self.items
    }
}

impl ListState<ChatUser> {
    pub fn users(&self) -> &Snapshot<ChatUser> {
        &self.items
    }
}

/// Shared machinery of the offset-paginated facades: one linked list observed in
/// the store, paged through with increasing offsets, newest page first.
pub(crate) struct OffsetList<T: Entity> {
    orchestrator: PaginatedFetchOrchestrator<T, ListPosition>,
    observer: ListObserver<T>,
    state: Published<ListState<T>>,
    fetcher: PageFetcher<T>,
    page_size: usize,
    _linking: Option<EventSubscription>,
}

impl<T: Entity> OffsetList<T> {
    pub fn new(
        env: &Environment,
        list: ListKey,
        sort: Vec<Sorting<T::SortKey>>,
        page_size: usize,
        fetcher: PageFetcher<T>,
    ) -> Self {
        let state = Published::new(ListState::default());
        let observer = ListObserver::new(
            &env.store,
            FetchSpecification::linked(list.clone(), sort),
            env.context.clone(),
            env.config.diff,
        );
        let published = state.clone();
        observer.on_change(move |update| {
            let snapshot = update.snapshot.clone();
            published.update(|state| state.items = snapshot);
        });
        let (initial, _) = observer.start_observing();
        state.update(|state| state.items = initial);

        let orchestrator = PaginatedFetchOrchestrator::new(
            Arc::clone(&env.store),
            list,
            DisplayOrder::NewestFirst,
            |position, _: &T| ListPosition(position),
        );
        let published = state.clone();
        let context = env.context.clone();
        orchestrator.on_state_change(move |pagination| {
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

        Self {
            orchestrator,
            observer,
            state,
            fetcher,
            page_size,
            _linking: None,
        }
    }

    /// Keeps the list's membership in step with events through `subscription`.
    pub fn with_linking(mut self, subscription: EventSubscription) -> Self {
        self._linking = Some(subscription);
        self
    }

    pub fn state(&self) -> &Published<ListState<T>> {
        &self.state
    }

    pub fn items(&self) -> Snapshot<T> {
        self.observer.items()
    }

    pub fn list(&self) -> &ListKey {
        self.orchestrator.list()
    }

    pub fn page_events(&self) -> ChangeStream<PageLoaded<T>> {
        self.orchestrator.page_events()
    }

    pub async fn load_first_page(&self) -> StateResult<Vec<T>> {
        self.load(LoadDirection::FirstPage, self.page_size).await
    }

    pub async fn load_more(&self, limit: Option<usize>) -> StateResult<Vec<T>> {
        let limit = ensure_positive_limit(limit.unwrap_or(self.page_size), "load_more")?;
        self.load(LoadDirection::Older, limit).await
    }

    async fn load(&self, direction: LoadDirection, limit: usize) -> StateResult<Vec<T>> {
        let fetcher = Arc::clone(&self.fetcher);
        let outcome = self
            .orchestrator
            .fetch(direction, limit, move |offset| {
                fetcher(Pagination::new(limit).with_offset(offset))
            })
            .await?;
        Ok(outcome.into_items())
    }
}
