use std::collections::BTreeSet;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;

use crate::state::logger::OBSERVER_LOGGER;
use crate::state::model::{Entity, EntityId};
use crate::state::observer::{ChangeStream, ConsumptionContext};
use crate::state::store::{ChangeSet, MemoryStore, StoreSubscription};

#[derive(Clone, Debug, PartialEq)]
pub enum EntityChange<T> {
    Create(T),
    Update(T),
    /// Only `field`, one of the tracked fields, changed.
    FieldUpdate { item: T, field: String },
    Remove(T),
}

impl<T> EntityChange<T> {
    pub fn item(&self) -> &T {
        match self {
            EntityChange::Create(item)
            | EntityChange::Update(item)
            | EntityChange::FieldUpdate { item, .. }
            | EntityChange::Remove(item) => item,
        }
    }
}

type EntityCallback<T> = Arc<dyn Fn(&EntityChange<T>) + Send + Sync + 'static>;

/// Follows a single entity by identity.
pub struct EntityObserver<T: Entity> {
    inner: Arc<EntityObserverInner<T>>,
}

struct EntityObserverInner<T: Entity> {
    store: Weak<MemoryStore>,
    id: T::Id,
    context: ConsumptionContext,
    state: StdMutex<EntityObserverState<T>>,
}

struct EntityObserverState<T: Entity> {
    current: Option<T>,
    tracked_fields: BTreeSet<String>,
    senders: Vec<async_channel::Sender<EntityChange<T>>>,
    on_change: Option<EntityCallback<T>>,
    subscription: Option<StoreSubscription>,
}

impl<T: Entity> EntityObserver<T> {
    pub fn new(store: &Arc<MemoryStore>, id: T::Id, context: ConsumptionContext) -> Self {
        Self {
            inner: Arc::new(EntityObserverInner {
                store: Arc::downgrade(store),
                id,
                context,
                state: StdMutex::new(EntityObserverState {
                    current: None,
                    tracked_fields: BTreeSet::new(),
                    senders: Vec::new(),
                    on_change: None,
                    subscription: None,
                }),
            }),
        }
    }

    /// Top-level serialized fields reported as [`EntityChange::FieldUpdate`] when they
    /// are the only field that changed.
    pub fn tracked_fields<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .lock_state()
            .tracked_fields
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> &T::Id {
        &self.inner.id
    }

    pub fn start_observing(&self) -> Option<T> {
        let mut state = self.inner.lock_state();
        if state.subscription.is_none() {
            let store = self.inner.store.upgrade()?;
            let weak_inner = Arc::downgrade(&self.inner);
            state.subscription = Some(store.subscribe(move |store, change_set| {
                if let Some(inner) = weak_inner.upgrade() {
                    inner.handle_change(store, change_set);
                }
            }));
            state.current = self.inner.read(&store);
        }
        state.current.clone()
    }

    pub fn subscribe_changes(&self) -> ChangeStream<EntityChange<T>> {
        let (sender, stream) = ChangeStream::channel();
        let mut state = self.inner.lock_state();
        if state.subscription.is_some() {
            state.senders.push(sender);
        }
        stream
    }

    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&EntityChange<T>) + Send + Sync + 'static,
    {
        self.inner.lock_state().on_change = Some(Arc::new(callback));
    }

    pub fn current(&self) -> Option<T> {
        self.inner.lock_state().current.clone()
    }

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

impl<T: Entity> Drop for EntityObserver<T> {
    fn drop(&mut self) {
        self.stop_observing();
    }
}

impl<T: Entity> EntityObserverInner<T> {
    fn lock_state(&self) -> MutexGuard<'_, EntityObserverState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self, store: &MemoryStore) -> Option<T> {
        store.entity::<T>(&self.id).unwrap_or_else(|err| {
            OBSERVER_LOGGER.warn(format!(
                "Failed to read {} '{}', treating it as missing: {err}",
                T::KIND.as_str(),
                self.id
            ));
            None
        })
    }

    fn handle_change(&self, store: &MemoryStore, change_set: &ChangeSet) {
        if !change_set.reset && change_set.change_for(T::KIND, self.id.as_key()).is_none() {
            return;
        }

        let (change, callback) = {
            let mut state = self.lock_state();
            if state.subscription.is_none() {
                return;
            }
            let next = self.read(store);
            let change = match (state.current.take(), next.clone()) {
                (None, Some(created)) => EntityChange::Create(created),
                (Some(removed), None) => EntityChange::Remove(removed),
                (Some(previous), Some(updated)) if previous != updated => {
                    classify_update(&previous, updated, &state.tracked_fields)
                }
                (previous, _) => {
                    state.current = previous;
                    return;
                }
            };
            state.current = next;
            state
                .senders
                .retain(|sender| sender.try_send(change.clone()).is_ok());
            (change, state.on_change.clone())
        };

        if let Some(callback) = callback {
            self.context.dispatch(move || callback(&change));
        }
    }
}

fn classify_update<T: Entity>(
    previous: &T,
    updated: T,
    tracked_fields: &BTreeSet<String>,
) -> EntityChange<T> {
    if tracked_fields.is_empty() {
        return EntityChange::Update(updated);
    }
    let changed = changed_fields(
        &serde_json::to_value(previous).unwrap_or(Value::Null),
        &serde_json::to_value(&updated).unwrap_or(Value::Null),
    );
    match changed.as_slice() {
        [field] if tracked_fields.contains(field) => EntityChange::FieldUpdate {
            field: field.clone(),
            item: updated,
        },
        _ => EntityChange::Update(updated),
    }
}

fn changed_fields(previous: &Value, updated: &Value) -> Vec<String> {
    match (previous.as_object(), updated.as_object()) {
        (Some(before), Some(after)) => {
            let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
            keys.into_iter()
                .filter(|key| before.get(*key) != after.get(*key))
                .cloned()
                .collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::model::timestamps::from_millis;
    use crate::state::model::{ChatUser, UserId};

    fn user(id: &str) -> ChatUser {
        ChatUser::new(UserId::new(id), from_millis(0))
    }

    #[tokio::test]
    async fn reports_create_field_update_update_and_remove() {
        let store = Arc::new(MemoryStore::new());
        let observer = EntityObserver::<ChatUser>::new(
            &store,
            UserId::new("u1"),
            ConsumptionContext::immediate(),
        )
        .tracked_fields(["is_online", "name"]);
        assert_eq!(observer.start_observing(), None);
        let changes = observer.subscribe_changes();

        store.write(|s| s.save(&user("u1"))).await.unwrap();
        assert!(matches!(changes.try_next(), Some(EntityChange::Create(_))));

        let mut online = user("u1");
        online.is_online = true;
        store.write(|s| s.save(&online)).await.unwrap();
        match changes.try_next() {
            Some(EntityChange::FieldUpdate { field, item }) => {
                assert_eq!(field, "is_online");
                assert!(item.is_online);
            }
            other => panic!("unexpected change {other:?}"),
        }

        let mut renamed_and_promoted = online.clone();
        renamed_and_promoted.name = Some("Ada".into());
        renamed_and_promoted.role = "admin".into();
        store
            .write(|s| s.save(&renamed_and_promoted))
            .await
            .unwrap();
        assert!(matches!(changes.try_next(), Some(EntityChange::Update(_))));

        store
            .write(|s| {
                s.delete::<ChatUser>(&UserId::new("u1"));
                Ok(())
            })
            .await
            .unwrap();
        assert!(matches!(changes.try_next(), Some(EntityChange::Remove(_))));
        assert_eq!(observer.current(), None);
    }

    #[tokio::test]
    async fn other_entities_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let observer = EntityObserver::<ChatUser>::new(
            &store,
            UserId::new("u1"),
            ConsumptionContext::immediate(),
        );
        observer.start_observing();
        let changes = observer.subscribe_changes();

        store.write(|s| s.save(&user("u2"))).await.unwrap();
        assert!(changes.try_next().is_none());

        observer.stop_observing();
        observer.stop_observing();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn changed_fields_compares_top_level_keys() {
        let before = serde_json::json!({"a": 1, "b": {"c": 2}});
        let after = serde_json::json!({"a": 1, "b": {"c": 3}, "d": true});
        assert_eq!(changed_fields(&before, &after), ["b", "d"]);
    }
}
