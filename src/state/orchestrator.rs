//! Remote page fetches applied to the store as single transactions.
//!
//! [`PaginatedFetchOrchestrator`] owns the [`PaginationStateMachine`] of one list.
//! A fetch reserves its direction, calls the remote, saves the page and updates
//! the list's link records in one store write, and only then merges the page
//! into the pagination window. Observers of the list therefore always fire from
//! committed data.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use crate::state::error::{superseded, StateResult};
use crate::state::logger::PAGINATION_LOGGER;
use crate::state::model::{Entity, EntityId};
use crate::state::observer::ChangeStream;
use crate::state::pagination_state::{
    DisplayOrder, LoadDirection, LoadRejection, MergePolicy, PaginationState,
    PaginationStateMachine,
};
use crate::state::query::ListKey;
use crate::state::remote::PageResult;
use crate::state::store::{MemoryStore, StoreSubscription};

type KeyFn<T, K> = Arc<dyn Fn(usize, &T) -> K + Send + Sync + 'static>;
type StateCallback<K> = Arc<dyn Fn(&PaginationState<K>) + Send + Sync + 'static>;

/// Published once a page has been committed and merged.
#[derive(Clone, Debug, PartialEq)]
pub struct PageLoaded<T> {
    pub direction: LoadDirection,
    pub policy: MergePolicy,
    pub items: Vec<T>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome<T> {
    Loaded(Vec<T>),
    /// Turned away without a remote call; carries the most recent page.
    Rejected {
        reason: LoadRejection,
        last_page: Vec<T>,
    },
}

impl<T> FetchOutcome<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            FetchOutcome::Loaded(items) => items,
            FetchOutcome::Rejected { last_page, .. } => last_page,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, FetchOutcome::Rejected { .. })
    }
}

/// Fan-out of [`PageLoaded`] notifications.
pub struct PageFeed<T> {
    senders: StdMutex<Vec<async_channel::Sender<PageLoaded<T>>>>,
}

impl<T: Clone> PageFeed<T> {
    pub(crate) fn new() -> Self {
        Self {
            senders: StdMutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> ChangeStream<PageLoaded<T>> {
        let (sender, stream) = ChangeStream::channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        stream
    }

    fn publish(&self, page: &PageLoaded<T>) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|sender| sender.try_send(page.clone()).is_ok());
    }
}

struct Shared<T, K> {
    machine: StdMutex<PaginationStateMachine<K>>,
    last_page: StdMutex<Vec<T>>,
    /// Keys of every item the remote delivered since the window was replaced.
    delivered: StdMutex<BTreeSet<String>>,
    on_state_change: StdMutex<Option<StateCallback<K>>>,
}

impl<T, K: Ord + Clone> Shared<T, K> {
    fn machine(&self) -> MutexGuard<'_, PaginationStateMachine<K>> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `step` on the machine and reports the resulting state outside the lock.
    fn transition<R>(&self, step: impl FnOnce(&mut PaginationStateMachine<K>) -> R) -> R {
        let (result, state) = {
            let mut machine = self.machine();
            let result = step(&mut machine);
            (result, machine.state().clone())
        };
        let callback = self
            .on_state_change
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(&state);
        }
        result
    }
}

/// Returns the machine to idle for `direction` unless the load completed.
struct InFlight<'a, T, K: Ord + Clone> {
    shared: &'a Shared<T, K>,
    direction: LoadDirection,
    armed: bool,
}

impl<T, K: Ord + Clone> Drop for InFlight<'_, T, K> {
    fn drop(&mut self) {
        if self.armed {
            let direction = self.direction;
            self.shared.transition(|machine| machine.fail(direction));
        }
    }
}

/// Fetches pages of one linked list. See the module documentation.
pub struct PaginatedFetchOrchestrator<T: Entity, K> {
    store: Arc<MemoryStore>,
    list: ListKey,
    key_of: KeyFn<T, K>,
    shared: Arc<Shared<T, K>>,
    pages: Arc<PageFeed<T>>,
    _reset: StoreSubscription,
}

impl<T, K> PaginatedFetchOrchestrator<T, K>
where
    T: Entity,
    K: Ord + Clone + Send + 'static,
{
    /// `key_of` maps an item and its position among the items loaded into the
    /// window to its pagination key.
    pub fn new<F>(store: Arc<MemoryStore>, list: ListKey, order: DisplayOrder, key_of: F) -> Self
    where
        F: Fn(usize, &T) -> K + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            machine: StdMutex::new(PaginationStateMachine::new(order)),
            last_page: StdMutex::new(Vec::new()),
            delivered: StdMutex::new(BTreeSet::new()),
            on_state_change: StdMutex::new(None),
        });
        let weak = Arc::downgrade(&shared);
        let reset = store.subscribe(move |_, change_set| {
            if !change_set.reset {
                return;
            }
            if let Some(shared) = weak.upgrade() {
                shared
                    .last_page
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
                shared
                    .delivered
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
                shared.transition(PaginationStateMachine::reset);
            }
        });
        Self {
            store,
            list,
            key_of: Arc::new(key_of),
            shared,
            pages: Arc::new(PageFeed::new()),
            _reset: reset,
        }
    }

    /// Publishes page notifications on `pages` instead of a feed of its own.
    pub(crate) fn with_page_feed(mut self, pages: Arc<PageFeed<T>>) -> Self {
        self.pages = pages;
        self
    }

    pub fn list(&self) -> &ListKey {
        &self.list
    }

    pub fn state(&self) -> PaginationState<K> {
        self.shared.machine().state().clone()
    }

    /// Called after every pagination transition with the new state.
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(&PaginationState<K>) + Send + Sync + 'static,
    {
        *self
            .shared
            .on_state_change
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    pub fn page_events(&self) -> ChangeStream<PageLoaded<T>> {
        self.pages.subscribe()
    }

    pub fn last_page(&self) -> Vec<T> {
        self.shared
            .last_page
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Server position where the next merging page starts: the delivered items
    /// that are still linked. Items events unlinked have left the server's result
    /// set too, and items events linked were never counted by the server.
    fn next_offset(&self) -> usize {
        self.shared
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|key| self.store.is_linked(&self.list, key))
            .count()
    }

    /// Fetches one page. `remote` receives the offset of the page: zero for
    /// replacing loads, otherwise the number of delivered items still in the list.
    pub async fn fetch<F, Fut>(
        &self,
        direction: LoadDirection,
        requested: usize,
        remote: F,
    ) -> StateResult<FetchOutcome<T>>
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = StateResult<PageResult<T>>>,
    {
        self.fetch_checked(direction, requested, remote, || true)
            .await
    }

    /// Fetches a page anchored at an explicit item inside the window. An
    /// exhausted direction does not turn it away.
    pub async fn fetch_anchored<F, Fut>(
        &self,
        direction: LoadDirection,
        requested: usize,
        remote: F,
    ) -> StateResult<FetchOutcome<T>>
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = StateResult<PageResult<T>>>,
    {
        self.run(direction, requested, remote, || true, true).await
    }

    /// Like [`fetch`](Self::fetch), but the page is only committed while
    /// `still_current` holds; checked inside the store transaction.
    pub async fn fetch_checked<F, Fut, C>(
        &self,
        direction: LoadDirection,
        requested: usize,
        remote: F,
        still_current: C,
    ) -> StateResult<FetchOutcome<T>>
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = StateResult<PageResult<T>>>,
        C: Fn() -> bool,
    {
        self.run(direction, requested, remote, still_current, false)
            .await
    }

    async fn run<F, Fut, C>(
        &self,
        direction: LoadDirection,
        requested: usize,
        remote: F,
        still_current: C,
        anchored: bool,
    ) -> StateResult<FetchOutcome<T>>
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = StateResult<PageResult<T>>>,
        C: Fn() -> bool,
    {
        let begun = self.shared.transition(|machine| {
            let started = if anchored {
                machine.begin_anchored(direction)
            } else {
                machine.begin(direction)
            };
            started.map(|()| (machine.merge_policy(direction), machine.state().loaded_count))
        });
        // Keys count positions within the window; the remote offset counts
        // positions in the server's current result set.
        let (first_position, offset) = match begun {
            Ok((MergePolicy::Replace, _)) => (0, 0),
            Ok((MergePolicy::Prepend | MergePolicy::Append, loaded)) => (loaded, self.next_offset()),
            Err(reason) => {
                return Ok(FetchOutcome::Rejected {
                    reason,
                    last_page: self.last_page(),
                });
            }
        };
        let mut in_flight = InFlight {
            shared: &self.shared,
            direction,
            armed: true,
        };

        let page = remote(offset).await?;
        let replace = matches!(
            direction,
            LoadDirection::FirstPage | LoadDirection::Around
        );
        self.store
            .write(|session| {
                if !still_current() {
                    let operation = format!("{} load of {}", direction.as_str(), self.list);
                    return Err(superseded(&operation));
                }
                session.save_all(&page.items)?;
                if replace {
                    session.unlink_all(&self.list);
                }
                for item in &page.items {
                    session.link(&self.list, &item.id());
                }
                Ok(())
            })
            .await?;

        let keys: Vec<K> = page
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| (self.key_of)(first_position + index, item))
            .collect();
        {
            let mut delivered = self
                .shared
                .delivered
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if replace {
                delivered.clear();
            }
            delivered.extend(page.items.iter().map(|item| item.id().as_key().to_owned()));
        }
        in_flight.armed = false;
        let policy = self
            .shared
            .transition(|machine| machine.complete(direction, keys, requested, page.edges));

        *self
            .shared
            .last_page
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = page.items.clone();
        PAGINATION_LOGGER.debug(format!(
            "Committed {} item(s) to {} ({:?})",
            page.items.len(),
            self.list,
            policy
        ));
        self.pages.publish(&PageLoaded {
            direction,
            policy,
            items: page.items.clone(),
        });
        Ok(FetchOutcome::Loaded(page.items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::error::{remote_error, StateErrorCode};
    use crate::state::model::timestamps::from_millis;
    use crate::state::model::{ChatUser, UserId, UserListSortingKey};
    use crate::state::pagination_state::{ListPosition, PageEdges};
    use crate::state::query::{FetchSpecification, Sorting};

    fn users(range: std::ops::Range<usize>) -> Vec<ChatUser> {
        range
            .map(|index| ChatUser::new(UserId::new(format!("u{index:02}")), from_millis(0)))
            .collect()
    }

    fn orchestrator(store: &Arc<MemoryStore>) -> PaginatedFetchOrchestrator<ChatUser, ListPosition> {
        PaginatedFetchOrchestrator::new(
            Arc::clone(store),
            ListKey::new("users:all"),
            DisplayOrder::NewestFirst,
            |position, _| ListPosition(position),
        )
    }

    fn page(items: Vec<ChatUser>) -> StateResult<PageResult<ChatUser>> {
        Ok(PageResult::new(items))
    }

    #[tokio::test]
    async fn pages_are_linked_and_offsets_advance() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&store);
        let events = orchestrator.page_events();

        let first = orchestrator
            .fetch(LoadDirection::FirstPage, 3, |offset| {
                assert_eq!(offset, 0);
                async { page(users(0..3)) }
            })
            .await
            .unwrap();
        assert_eq!(first.into_items().len(), 3);

        orchestrator
            .fetch(LoadDirection::Older, 3, |offset| {
                assert_eq!(offset, 3);
                async { page(users(3..5)) }
            })
            .await
            .unwrap();

        let state = orchestrator.state();
        assert_eq!(state.loaded_count, 5);
        assert!(state.has_loaded_all_older);
        assert_eq!(state.oldest_loaded_key, Some(ListPosition(4)));
        assert_eq!(store.linked_keys(orchestrator.list()).len(), 5);

        let spec = FetchSpecification::<ChatUser>::linked(
            orchestrator.list().clone(),
            vec![Sorting::ascending(UserListSortingKey::Id)],
        );
        assert_eq!(store.fetch(&spec).unwrap().len(), 5);

        assert_eq!(events.try_next().unwrap().policy, MergePolicy::Replace);
        assert_eq!(events.try_next().unwrap().policy, MergePolicy::Append);
    }

    #[tokio::test]
    async fn offsets_count_delivered_items_still_in_the_list() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&store);
        let list = orchestrator.list().clone();
        orchestrator
            .fetch(LoadDirection::FirstPage, 3, |_| async { page(users(0..3)) })
            .await
            .unwrap();

        // One delivered item leaves the list and an unrelated one joins it.
        let extra = users(9..10);
        store
            .write(|session| {
                session.unlink(&list, &UserId::new("u00"));
                session.save_all(&extra)?;
                session.link(&list, &UserId::new("u09"));
                Ok(())
            })
            .await
            .unwrap();

        orchestrator
            .fetch(LoadDirection::Older, 3, |offset| {
                assert_eq!(offset, 2);
                async { page(users(3..6)) }
            })
            .await
            .unwrap();
        orchestrator
            .fetch(LoadDirection::Older, 3, |offset| {
                assert_eq!(offset, 5);
                async { page(users(6..7)) }
            })
            .await
            .unwrap();
        assert_eq!(store.linked_keys(&list).len(), 7);
    }

    #[tokio::test]
    async fn anchored_fetches_pass_an_exhausted_direction() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&store);
        orchestrator
            .fetch(LoadDirection::FirstPage, 5, |_| async { page(users(0..2)) })
            .await
            .unwrap();
        let outcome = orchestrator
            .fetch_anchored(LoadDirection::Older, 5, |_| async { page(users(1..2)) })
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Loaded(users(1..2)));
        assert!(orchestrator.state().has_loaded_all_older);
    }

    #[tokio::test]
    async fn exhausted_direction_returns_last_page_without_calling_remote() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&store);
        orchestrator
            .fetch(LoadDirection::FirstPage, 5, |_| async { page(users(0..2)) })
            .await
            .unwrap();

        let outcome = orchestrator
            .fetch(LoadDirection::Older, 5, |_| async {
                Err::<PageResult<ChatUser>, _>(remote_error("remote must not be called"))
            })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Rejected {
                reason: LoadRejection::Exhausted,
                last_page: users(0..2)
            }
        );
    }

    #[tokio::test]
    async fn failures_leave_the_window_untouched() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&store);
        orchestrator
            .fetch(LoadDirection::FirstPage, 2, |_| async { page(users(0..2)) })
            .await
            .unwrap();
        let before = orchestrator.state();

        let err = orchestrator
            .fetch(LoadDirection::Older, 2, |_| async {
                Err::<PageResult<ChatUser>, _>(remote_error("offline"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, StateErrorCode::Remote);
        assert_eq!(orchestrator.state(), before);
        assert!(!orchestrator.state().is_loading());
    }

    #[tokio::test]
    async fn stale_results_are_not_committed() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&store);
        let err = orchestrator
            .fetch_checked(
                LoadDirection::FirstPage,
                2,
                |_| async { page(users(0..2)) },
                || false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, StateErrorCode::Superseded);
        assert!(store.linked_keys(orchestrator.list()).is_empty());
        assert!(!orchestrator.state().is_loading_first_page);
    }

    #[tokio::test]
    async fn replacing_loads_drop_previous_links() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&store);
        orchestrator
            .fetch(LoadDirection::FirstPage, 2, |_| async { page(users(0..2)) })
            .await
            .unwrap();
        orchestrator
            .fetch(LoadDirection::Around, 2, |_| async {
                Ok(PageResult::new(users(7..9)).with_edges(PageEdges {
                    reached_oldest: false,
                    reached_newest: true,
                }))
            })
            .await
            .unwrap();
        let linked = store.linked_keys(orchestrator.list());
        assert_eq!(linked, vec!["u07".to_owned(), "u08".to_owned()]);
        assert!(orchestrator.state().has_loaded_all_newer);
        assert!(!orchestrator.state().has_loaded_all_older);
    }

    #[tokio::test]
    async fn state_callback_sees_loading_flags() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&store);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        orchestrator.on_state_change(move |state| sink.lock().unwrap().push(state.is_loading()));
        orchestrator
            .fetch(LoadDirection::FirstPage, 2, |_| async { page(users(0..2)) })
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn wiping_the_store_resets_the_window() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&store);
        orchestrator
            .fetch(LoadDirection::FirstPage, 5, |_| async { page(users(0..2)) })
            .await
            .unwrap();
        store.remove_all_data().await.unwrap();
        assert_eq!(orchestrator.state(), PaginationState::default());
        assert!(orchestrator.last_page().is_empty());
    }
}
