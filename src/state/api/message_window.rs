use std::sync::{Arc, Weak};

use crate::state::api::environment::Environment;
use crate::state::error::{ensure_positive_limit, invalid_argument, StateResult};
use crate::state::events::EventSubscription;
use crate::state::linking::{LinkFilter, ListLinkingCoordinator};
use crate::state::model::{ChatMessage, MessageId, MessageSortingKey};
use crate::state::observer::{ChangeStream, ListObserver};
use crate::state::orchestrator::{PageLoaded, PaginatedFetchOrchestrator};
use crate::state::pagination_state::{DisplayOrder, LoadDirection, MessageKey, PaginationState};
use crate::state::published::Published;
use crate::state::query::{
    FetchSpecification, MessageQuery, MessagesPagination, PaginationParameter, Sorting,
};
use crate::state::snapshot::Snapshot;

/// Pagination flags of a message timeline as shown to consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessagePaginationFlags {
    pub has_loaded_all_previous: bool,
    pub has_loaded_all_next: bool,
    pub is_loading_previous: bool,
    pub is_loading_next: bool,
    /// An around-load is in flight.
    pub is_loading_middle: bool,
    pub is_loading_first_page: bool,
    /// The loaded window is detached from the newest messages.
    pub is_jumping_to_message: bool,
}

impl From<&PaginationState<MessageKey>> for MessagePaginationFlags {
    fn from(state: &PaginationState<MessageKey>) -> Self {
        Self {
            has_loaded_all_previous: state.has_loaded_all_older,
            has_loaded_all_next: state.has_loaded_all_newer,
            is_loading_previous: state.is_loading_older,
            is_loading_next: state.is_loading_newer,
            is_loading_middle: state.is_loading_around,
            is_loading_first_page: state.is_loading_first_page,
            is_jumping_to_message: state.newest_loaded_key.is_some()
                && !state.has_loaded_all_newer,
        }
    }
}

/// Published state that embeds a message window.
pub(crate) trait MessageWindowState: Clone + Send + Sync + 'static {
    fn set_messages(&mut self, messages: Snapshot<ChatMessage>);
    fn set_pagination(&mut self, pagination: MessagePaginationFlags);
}

/// New messages arriving through events only join the window while it shows the
/// newest end of the timeline.
fn admits_live_message(state: &PaginationState<MessageKey>, message: &ChatMessage) -> bool {
    state.has_loaded_all_newer
        && state
            .oldest_loaded_key
            .as_ref()
            .map_or(true, |oldest| &MessageKey::from(message) >= oldest)
}

/// A cursor-paginated message timeline (channel or thread), oldest first.
pub(crate) struct MessageWindow<S: MessageWindowState> {
    env: Environment,
    query: MessageQuery,
    orchestrator: Arc<PaginatedFetchOrchestrator<ChatMessage, MessageKey>>,
    observer: ListObserver<ChatMessage>,
    state: Published<S>,
    page_size: usize,
    _linking: EventSubscription,
}

impl<S: MessageWindowState> MessageWindow<S> {
    pub fn new(env: &Environment, query: MessageQuery, state: Published<S>) -> Self {
        let list = query.list_key();
        let observer = ListObserver::new(
            &env.store,
            FetchSpecification::linked(
                list.clone(),
                vec![Sorting::ascending(MessageSortingKey::CreatedAt)],
            ),
            env.context.clone(),
            env.config.diff,
        );
        let published = state.clone();
        observer.on_change(move |update| {
            let snapshot = update.snapshot.clone();
            published.update(|state| state.set_messages(snapshot));
        });
        let (initial, _) = observer.start_observing();
        state.update(|state| state.set_messages(initial));

        let orchestrator = Arc::new(PaginatedFetchOrchestrator::new(
            Arc::clone(&env.store),
            list.clone(),
            DisplayOrder::OldestFirst,
            |_, message: &ChatMessage| MessageKey::from(message),
        ));
        let published = state.clone();
        let context = env.context.clone();
        orchestrator.on_state_change(move |pagination| {
            let flags = MessagePaginationFlags::from(pagination);
            let published = published.clone();
            context.dispatch(move || published.update(|state| state.set_pagination(flags)));
        });

        let belongs: LinkFilter<ChatMessage> = match &query {
            MessageQuery::Channel(cid) => {
                let cid = cid.clone();
                LinkFilter::dynamic(move |message: &ChatMessage| {
                    message.cid == cid && message.is_in_channel_timeline()
                })
            }
            MessageQuery::Thread { parent_id, .. } => {
                let parent_id = parent_id.clone();
                LinkFilter::dynamic(move |message: &ChatMessage| {
                    message.parent_id.as_ref() == Some(&parent_id)
                })
            }
        };
        let window: Weak<PaginatedFetchOrchestrator<ChatMessage, MessageKey>> =
            Arc::downgrade(&orchestrator);
        let coordinator = ListLinkingCoordinator::new(list, belongs)
            .with_admission(move |message: &ChatMessage| {
                window
                    .upgrade()
                    .is_some_and(|orchestrator| admits_live_message(&orchestrator.state(), message))
            });
        let linking = env.events.subscribe(Arc::new(coordinator));

        let page_size = env.config.messages_page_size;
        Self {
            env: env.clone(),
            query,
            orchestrator,
            observer,
            state,
            page_size,
            _linking: linking,
        }
    }

    pub fn query(&self) -> &MessageQuery {
        &self.query
    }

    pub fn state(&self) -> &Published<S> {
        &self.state
    }

    pub fn messages(&self) -> Snapshot<ChatMessage> {
        self.observer.items()
    }

    pub fn pagination(&self) -> PaginationState<MessageKey> {
        self.orchestrator.state()
    }

    pub fn page_events(&self) -> ChangeStream<PageLoaded<ChatMessage>> {
        self.orchestrator.page_events()
    }

    pub async fn load_first_page(&self) -> StateResult<Vec<ChatMessage>> {
        let pagination = MessagesPagination::first_page(self.page_size);
        self.load(LoadDirection::FirstPage, pagination).await
    }

    /// Loads messages older than `before`, or than the oldest loaded message.
    pub async fn load_previous(
        &self,
        before: Option<MessageId>,
        limit: Option<usize>,
    ) -> StateResult<Vec<ChatMessage>> {
        let limit = ensure_positive_limit(limit.unwrap_or(self.page_size), "load_previous")?;
        let boundary = self.pagination().oldest_loaded_key.map(|key| key.id);
        self.load_anchored(
            LoadDirection::Older,
            before,
            boundary,
            limit,
            MessagesPagination::before,
        )
        .await
    }

    /// Loads messages newer than `after`, or than the newest loaded message.
    pub async fn load_next(
        &self,
        after: Option<MessageId>,
        limit: Option<usize>,
    ) -> StateResult<Vec<ChatMessage>> {
        let limit = ensure_positive_limit(limit.unwrap_or(self.page_size), "load_next")?;
        let boundary = self.pagination().newest_loaded_key.map(|key| key.id);
        self.load_anchored(
            LoadDirection::Newer,
            after,
            boundary,
            limit,
            MessagesPagination::after,
        )
        .await
    }

    /// Replaces the window with a page centred on `id`.
    pub async fn load_around(
        &self,
        id: MessageId,
        limit: Option<usize>,
    ) -> StateResult<Vec<ChatMessage>> {
        let limit = ensure_positive_limit(limit.unwrap_or(self.page_size), "load_around")?;
        self.load(LoadDirection::Around, MessagesPagination::around(id, limit))
            .await
    }

    /// Routes an explicit pagination request to the matching load.
    pub async fn load_messages(
        &self,
        pagination: MessagesPagination,
    ) -> StateResult<Vec<ChatMessage>> {
        ensure_positive_limit(pagination.page_size, "load_messages")?;
        let direction = match &pagination.parameter {
            None => LoadDirection::FirstPage,
            Some(PaginationParameter::LessThan(_)) => LoadDirection::Older,
            Some(PaginationParameter::GreaterThan(_)) => LoadDirection::Newer,
            Some(PaginationParameter::Around(_)) => LoadDirection::Around,
        };
        self.load(direction, pagination).await
    }

    /// Pages from `explicit` when it names a message other than the window's
    /// `boundary`; only loads from the boundary stop at an exhausted direction.
    async fn load_anchored(
        &self,
        direction: LoadDirection,
        explicit: Option<MessageId>,
        boundary: Option<MessageId>,
        limit: usize,
        paginate: fn(MessageId, usize) -> MessagesPagination,
    ) -> StateResult<Vec<ChatMessage>> {
        match (explicit, boundary) {
            (Some(anchor), boundary) if boundary.as_ref() != Some(&anchor) => {
                let pagination = paginate(anchor, limit);
                let remote = Arc::clone(&self.env.remote);
                let query = self.query.clone();
                let outcome = self
                    .orchestrator
                    .fetch_anchored(direction, limit, move |_| async move {
                        remote.query_messages(&query, &pagination).await
                    })
                    .await?;
                Ok(outcome.into_items())
            }
            (_, Some(anchor)) => self.load(direction, paginate(anchor, limit)).await,
            // Always taken by the guarded arm above (`None != Some(anchor)`).
            (Some(_), None) => unreachable!("explicit anchor without boundary is handled above"),
            (None, None) if self.is_exhausted(direction) => Ok(self.orchestrator.last_page()),
            (None, None) => Err(invalid_argument(format!(
                "Cannot load {} messages before the first page is loaded",
                direction.as_str()
            ))),
        }
    }

    fn is_exhausted(&self, direction: LoadDirection) -> bool {
        let state = self.orchestrator.state();
        match direction {
            LoadDirection::Older => state.has_loaded_all_older,
            LoadDirection::Newer => state.has_loaded_all_newer,
            LoadDirection::FirstPage | LoadDirection::Around => false,
        }
    }

    async fn load(
        &self,
        direction: LoadDirection,
        pagination: MessagesPagination,
    ) -> StateResult<Vec<ChatMessage>> {
        let remote = Arc::clone(&self.env.remote);
        let query = self.query.clone();
        let requested = pagination.page_size;
        let outcome = self
            .orchestrator
            .fetch(direction, requested, move |_| async move {
                remote.query_messages(&query, &pagination).await
            })
            .await?;
        Ok(outcome.into_items())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::model::timestamps::from_millis;

    fn key(millis: i64, id: &str) -> MessageKey {
        MessageKey {
            created_at: from_millis(millis),
            id: MessageId::new(id),
        }
    }

    #[test]
    fn live_messages_join_only_at_the_newest_edge() {
        let message = crate::test_support::message("general", "m9", 900);
        let mut state = PaginationState::<MessageKey> {
            has_loaded_all_newer: true,
            oldest_loaded_key: Some(key(100, "m1")),
            ..PaginationState::default()
        };
        assert!(admits_live_message(&state, &message));

        state.oldest_loaded_key = Some(key(950, "m95"));
        assert!(!admits_live_message(&state, &message));

        state.oldest_loaded_key = Some(key(100, "m1"));
        state.has_loaded_all_newer = false;
        assert!(!admits_live_message(&state, &message));
    }

    #[test]
    fn flags_mark_detached_windows() {
        let state = PaginationState::<MessageKey> {
            newest_loaded_key: Some(key(500, "m5")),
            is_loading_around: true,
            ..PaginationState::default()
        };
        let flags = MessagePaginationFlags::from(&state);
        assert!(flags.is_jumping_to_message);
        assert!(flags.is_loading_middle);
        assert!(!MessagePaginationFlags::from(&PaginationState::default()).is_jumping_to_message);
    }
}
