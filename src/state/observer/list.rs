use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};

use crate::state::diff::{apply_changes, compute_changes, Diff, DiffOptions, ListChange};
use crate::state::logger::OBSERVER_LOGGER;
use crate::state::model::Entity;
use crate::state::observer::{ChangeStream, ConsumptionContext};
use crate::state::query::FetchSpecification;
use crate::state::snapshot::Snapshot;
use crate::state::store::{ChangeSet, MemoryStore, StoreSubscription};

/// A new snapshot together with the edit script from the previous one.
#[derive(Clone, Debug, PartialEq)]
pub struct ListUpdate<T: Entity> {
    pub snapshot: Snapshot<T>,
    pub changes: Vec<ListChange<T>>,
    /// The changes are remove-all + insert-all rather than a positional diff.
    pub is_reset: bool,
}

pub type DiffStream<T> = ChangeStream<ListUpdate<T>>;

type ListCallback<T> = Arc<dyn Fn(&ListUpdate<T>) + Send + Sync + 'static>;

/// Keeps a snapshot of one [`FetchSpecification`] in sync with the store.
///
/// The observer retains the last snapshot it produced and diffs every new store
/// state against it. Dropping the observer stops it.
pub struct ListObserver<T: Entity> {
    inner: Arc<ListObserverInner<T>>,
}

struct ListObserverInner<T: Entity> {
    store: Weak<MemoryStore>,
    spec: FetchSpecification<T>,
    context: ConsumptionContext,
    diff_options: DiffOptions,
    state: StdMutex<ListObserverState<T>>,
}

struct ListObserverState<T: Entity> {
    previous: Option<Snapshot<T>>,
    senders: Vec<async_channel::Sender<ListUpdate<T>>>,
    on_change: Option<ListCallback<T>>,
    subscription: Option<StoreSubscription>,
}

impl<T: Entity> ListObserver<T> {
    pub fn new(
        store: &Arc<MemoryStore>,
        spec: FetchSpecification<T>,
        context: ConsumptionContext,
        diff_options: DiffOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ListObserverInner {
                store: Arc::downgrade(store),
                spec,
                context,
                diff_options,
                state: StdMutex::new(ListObserverState {
                    previous: None,
                    senders: Vec::new(),
                    on_change: None,
                    subscription: None,
                }),
            }),
        }
    }

    pub fn spec(&self) -> &FetchSpecification<T> {
        &self.inner.spec
    }

    /// Subscribes to the store and performs the one initial read.
    ///
    /// A failed read is logged and reported as an empty snapshot. Calling this on a
    /// running observer returns the current snapshot and a fresh stream.
    pub fn start_observing(&self) -> (Snapshot<T>, DiffStream<T>) {
        let mut state = self.inner.lock_state();
        let (sender, stream) = ChangeStream::channel();

        if state.subscription.is_none() {
            let Some(store) = self.inner.store.upgrade() else {
                OBSERVER_LOGGER.warn("Store released before the observer started; reporting empty list");
                state.senders.push(sender);
                return (Snapshot::empty(), stream);
            };
            let weak_inner = Arc::downgrade(&self.inner);
            state.subscription = Some(store.subscribe(move |store, change_set| {
                if let Some(inner) = weak_inner.upgrade() {
                    inner.handle_change(store, change_set);
                }
            }));
            state.previous = Some(self.inner.read(&store));
        }

        state.senders.push(sender);
        let snapshot = state.previous.clone().unwrap_or_default();
        (snapshot, stream)
    }

    /// Another feed of updates for an observer that is already running.
    pub fn subscribe_changes(&self) -> DiffStream<T> {
        let (sender, stream) = ChangeStream::channel();
        let mut state = self.inner.lock_state();
        if state.subscription.is_some() {
            state.senders.push(sender);
        }
        stream
    }

    /// Sets the owner callback. It runs on the consumption context.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&ListUpdate<T>) + Send + Sync + 'static,
    {
        self.inner.lock_state().on_change = Some(Arc::new(callback));
    }

    /// The last snapshot produced by the observer.
    pub fn items(&self) -> Snapshot<T> {
        self.inner.lock_state().previous.clone().unwrap_or_default()
    }

    pub fn is_observing(&self) -> bool {
        self.inner.lock_state().subscription.is_some()
    }

    /// Releases the store subscription and closes every stream. Safe to repeat.
    pub fn stop_observing(&self) {
        let subscription = {
            let mut state = self.inner.lock_state();
            state.senders.clear();
            state.on_change = None;
            state.subscription.take()
        };
        if let Some(mut subscription) = subscription {
            subscription.cancel();
        }
    }
}

impl<T: Entity> Drop for ListObserver<T> {
    fn drop(&mut self) {
        self.stop_observing();
    }
}

impl<T: Entity> ListObserverInner<T> {
    fn lock_state(&self) -> MutexGuard<'_, ListObserverState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self, store: &MemoryStore) -> Snapshot<T> {
        store.fetch(&self.spec).unwrap_or_else(|err| {
            OBSERVER_LOGGER.warn(format!(
                "Failed to read {} list, treating it as empty: {err}",
                T::KIND.as_str()
            ));
            Snapshot::empty()
        })
    }

    fn handle_change(&self, store: &MemoryStore, change_set: &ChangeSet) {
        if !change_set.affects(T::KIND, self.spec.list.as_ref()) {
            return;
        }

        let (update, callback) = {
            let mut state = self.lock_state();
            if state.subscription.is_none() {
                return;
            }
            let previous = state.previous.clone().unwrap_or_default();
            let next = self.read(store);
            let Some(update) = self.make_update(&previous, next, change_set.reset) else {
                return;
            };
            state.previous = Some(update.snapshot.clone());
            state
                .senders
                .retain(|sender| sender.try_send(update.clone()).is_ok());
            (update, state.on_change.clone())
        };

        if let Some(callback) = callback {
            self.context.dispatch(move || callback(&update));
        }
    }

    fn make_update(
        &self,
        previous: &Snapshot<T>,
        next: Snapshot<T>,
        reset: bool,
    ) -> Option<ListUpdate<T>> {
        if reset {
            if previous.is_empty() && next.is_empty() {
                return None;
            }
            return Some(full_replace(previous, next));
        }

        let diff = compute_changes(previous.as_slice(), next.as_slice(), &self.diff_options);
        if diff.is_empty() {
            return None;
        }
        match apply_changes(previous.as_slice(), &diff.changes) {
            Ok(replayed) if replayed.as_slice() == next.as_slice() => Some(ListUpdate {
                snapshot: next,
                changes: diff.changes,
                is_reset: diff.full_replace,
            }),
            Ok(_) => {
                OBSERVER_LOGGER.warn(format!(
                    "Diff for {} list did not reproduce the new snapshot; rebuilding",
                    T::KIND.as_str()
                ));
                Some(full_replace(previous, next))
            }
            Err(err) => {
                OBSERVER_LOGGER.warn(format!(
                    "Rejected invalid diff for {} list ({err}); rebuilding",
                    T::KIND.as_str()
                ));
                Some(full_replace(previous, next))
            }
        }
    }
}

fn full_replace<T: Entity>(previous: &Snapshot<T>, next: Snapshot<T>) -> ListUpdate<T> {
    ListUpdate {
        changes: Diff::replace_all(previous.as_slice(), next.as_slice()).changes,
        snapshot: next,
        is_reset: true,
    }
}
