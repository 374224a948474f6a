use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, RwLockReadGuard, Weak};

use async_lock::Mutex as AsyncMutex;
use serde_json::Value;

use crate::state::error::{store_error, StateResult};
use crate::state::logger::STORE_LOGGER;
use crate::state::model::{Entity, EntityId, EntityKind};
use crate::state::query::{FetchSpecification, ListKey};
use crate::state::snapshot::Snapshot;
use crate::state::store::{ChangeSet, LinkChange, RecordChange, RecordChangeKind};

type StoreCallback = Arc<dyn Fn(&MemoryStore, &ChangeSet) + Send + Sync + 'static>;

#[derive(Clone, Debug, Default)]
struct StoreTables {
    records: BTreeMap<EntityKind, BTreeMap<String, Value>>,
    links: BTreeMap<ListKey, BTreeSet<String>>,
}

impl StoreTables {
    fn record(&self, kind: EntityKind, key: &str) -> Option<&Value> {
        self.records.get(&kind)?.get(key)
    }

    fn is_linked(&self, list: &ListKey, key: &str) -> bool {
        self.links.get(list).is_some_and(|keys| keys.contains(key))
    }
}

/// In-memory store holding entities as serialized records plus list link records.
///
/// Writes are serialized and applied atomically; readers observe either the state
/// before or after a transaction. Subscribers are notified synchronously after each
/// commit, before the next writer starts, so notifications follow commit order.
pub struct MemoryStore {
    tables: RwLock<StoreTables>,
    writer: AsyncMutex<()>,
    subscribers: StdMutex<BTreeMap<u64, StoreCallback>>,
    subscriber_counter: AtomicU64,
    transaction_counter: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(StoreTables::default()),
            writer: AsyncMutex::new(()),
            subscribers: StdMutex::new(BTreeMap::new()),
            subscriber_counter: AtomicU64::new(1),
            transaction_counter: AtomicU64::new(1),
        }
    }

    fn read_tables(&self) -> RwLockReadGuard<'_, StoreTables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `transaction` against a staging session and commits it if it returns `Ok`.
    /// An `Err` discards every staged mutation.
    pub async fn write<F, R>(&self, transaction: F) -> StateResult<R>
    where
        F: FnOnce(&mut StoreSession<'_>) -> StateResult<R>,
    {
        let _writer = self.writer.lock().await;

        let (result, staged) = {
            let tables = self.read_tables();
            let mut session = StoreSession::new(&tables);
            let result = transaction(&mut session)?;
            (result, session.into_staged())
        };

        let change_set = {
            let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
            staged.commit(&mut tables, self.next_transaction())
        };

        if !change_set.is_empty() {
            STORE_LOGGER.debug(format!(
                "Committed transaction {}: {} record change(s), {} link change(s)",
                change_set.transaction,
                change_set.entities.len(),
                change_set.links.len()
            ));
            self.notify(&change_set);
        }
        Ok(result)
    }

    fn next_transaction(&self) -> u64 {
        self.transaction_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn notify(&self, change_set: &ChangeSet) {
        let callbacks: Vec<StoreCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(self, change_set);
        }
    }

    pub fn entity<T: Entity>(&self, id: &T::Id) -> StateResult<Option<T>> {
        let tables = self.read_tables();
        decode_optional(tables.record(T::KIND, id.as_key()))
    }

    /// Evaluates a live query: candidate records (all of `T`, or those linked to the
    /// specification's list), filtered, sorted and truncated to the limit.
    pub fn fetch<T: Entity>(&self, spec: &FetchSpecification<T>) -> StateResult<Snapshot<T>> {
        let tables = self.read_tables();
        let Some(records) = tables.records.get(&T::KIND) else {
            return Ok(Snapshot::empty());
        };

        let candidates: Vec<&Value> = match &spec.list {
            Some(list) => tables
                .links
                .get(list)
                .map(|keys| keys.iter().filter_map(|key| records.get(key)).collect())
                .unwrap_or_default(),
            None => records.values().collect(),
        };

        let mut items = Vec::with_capacity(candidates.len());
        for record in candidates {
            if !spec.filter.matches(record) {
                continue;
            }
            items.push(serde_json::from_value::<T>(record.clone())?);
        }
        drop(tables);

        let snapshot = Snapshot::from_items(items, |lhs, rhs| spec.compare(lhs, rhs));
        match spec.limit {
            Some(limit) if snapshot.len() > limit => {
                let mut items = snapshot.to_vec();
                items.truncate(limit);
                Ok(Snapshot::from_sorted(items))
            }
            _ => Ok(snapshot),
        }
    }

    pub fn linked_keys(&self, list: &ListKey) -> Vec<String> {
        self.read_tables()
            .links
            .get(list)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_linked(&self, list: &ListKey, key: &str) -> bool {
        self.read_tables().is_linked(list, key)
    }

    /// Number of link records across every list.
    pub fn link_count(&self) -> usize {
        self.read_tables().links.values().map(BTreeSet::len).sum()
    }

    pub fn record_count(&self, kind: EntityKind) -> usize {
        self.read_tables()
            .records
            .get(&kind)
            .map_or(0, BTreeMap::len)
    }

    /// Imports an already-serialized record as-is. The record is only decoded on read.
    pub async fn insert_raw_record(
        &self,
        kind: EntityKind,
        key: impl Into<String>,
        record: Value,
    ) -> StateResult<()> {
        let key = key.into();
        self.write(move |session| {
            session.put_raw(kind, key, record);
            Ok(())
        })
        .await
    }

    /// Drops every record and link. Subscribers receive a reset change set listing a
    /// delete for every record that existed.
    pub async fn remove_all_data(&self) -> StateResult<()> {
        let _writer = self.writer.lock().await;
        let previous = {
            let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *tables)
        };

        let entities = previous
            .records
            .iter()
            .flat_map(|(kind, records)| {
                records.keys().map(|key| RecordChange {
                    kind: *kind,
                    key: key.clone(),
                    change: RecordChangeKind::Delete,
                })
            })
            .collect();
        let links = previous
            .links
            .iter()
            .flat_map(|(list, keys)| {
                keys.iter().map(|key| LinkChange {
                    list: list.clone(),
                    key: key.clone(),
                    linked: false,
                })
            })
            .collect();
        let change_set = ChangeSet {
            transaction: self.next_transaction(),
            entities,
            links,
            reset: true,
        };
        STORE_LOGGER.info(format!(
            "Removed all local data ({} record(s))",
            change_set.entities.len()
        ));
        self.notify(&change_set);
        Ok(())
    }

    /// Registers `callback` for every committed change set. The returned handle
    /// unregisters on [`StoreSubscription::cancel`] or when dropped.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> StoreSubscription
    where
        F: Fn(&MemoryStore, &ChangeSet) + Send + Sync + 'static,
    {
        let id = self.subscriber_counter.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        StoreSubscription {
            store: Arc::downgrade(self),
            id,
            cancelled: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn remove_subscriber(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

fn decode_optional<T: Entity>(record: Option<&Value>) -> StateResult<Option<T>> {
    record
        .map(|value| serde_json::from_value(value.clone()).map_err(Into::into))
        .transpose()
}

/// Registration handle returned by [`MemoryStore::subscribe`].
pub struct StoreSubscription {
    store: Weak<MemoryStore>,
    id: u64,
    cancelled: bool,
}

impl StoreSubscription {
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Some(store) = self.store.upgrade() {
            store.remove_subscriber(self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Staged view of the store inside [`MemoryStore::write`]. Reads see staged
/// mutations layered over the committed state.
pub struct StoreSession<'a> {
    base: &'a StoreTables,
    staged: StagedWrites,
}

#[derive(Default)]
struct StagedWrites {
    records: BTreeMap<(EntityKind, String), Option<Value>>,
    links: BTreeMap<(ListKey, String), bool>,
}

impl<'a> StoreSession<'a> {
    fn new(base: &'a StoreTables) -> Self {
        Self {
            base,
            staged: StagedWrites::default(),
        }
    }

    fn into_staged(self) -> StagedWrites {
        self.staged
    }

    fn record(&self, kind: EntityKind, key: &str) -> Option<&Value> {
        match self.staged.records.get(&(kind, key.to_owned())) {
            Some(staged) => staged.as_ref(),
            None => self.base.record(kind, key),
        }
    }

    pub fn entity<T: Entity>(&self, id: &T::Id) -> StateResult<Option<T>> {
        decode_optional(self.record(T::KIND, id.as_key()))
    }

    pub fn contains<T: Entity>(&self, id: &T::Id) -> bool {
        self.record(T::KIND, id.as_key()).is_some()
    }

    pub fn save<T: Entity>(&mut self, entity: &T) -> StateResult<()> {
        let record = serde_json::to_value(entity).map_err(|err| {
            store_error(format!(
                "Failed to encode {} '{}': {err}",
                T::KIND.as_str(),
                entity.id()
            ))
        })?;
        self.put_raw(T::KIND, entity.id().as_key().to_owned(), record);
        Ok(())
    }

    pub fn save_all<'e, T: Entity>(
        &mut self,
        entities: impl IntoIterator<Item = &'e T>,
    ) -> StateResult<()> {
        for entity in entities {
            self.save(entity)?;
        }
        Ok(())
    }

    /// Loads, mutates and saves an entity. Returns the updated value, or `None`
    /// when the entity is not stored.
    pub fn update<T, F>(&mut self, id: &T::Id, mutate: F) -> StateResult<Option<T>>
    where
        T: Entity,
        F: FnOnce(&mut T),
    {
        let Some(mut entity) = self.entity::<T>(id)? else {
            return Ok(None);
        };
        mutate(&mut entity);
        self.save(&entity)?;
        Ok(Some(entity))
    }

    pub fn delete<T: Entity>(&mut self, id: &T::Id) {
        self.staged
            .records
            .insert((T::KIND, id.as_key().to_owned()), None);
    }

    fn put_raw(&mut self, kind: EntityKind, key: String, record: Value) {
        self.staged.records.insert((kind, key), Some(record));
    }

    pub fn is_linked(&self, list: &ListKey, key: &str) -> bool {
        match self.staged.links.get(&(list.clone(), key.to_owned())) {
            Some(linked) => *linked,
            None => self.base.is_linked(list, key),
        }
    }

    pub fn link(&mut self, list: &ListKey, id: &impl EntityId) {
        self.staged
            .links
            .insert((list.clone(), id.as_key().to_owned()), true);
    }

    pub fn unlink(&mut self, list: &ListKey, id: &impl EntityId) {
        self.staged
            .links
            .insert((list.clone(), id.as_key().to_owned()), false);
    }

    /// Unlinks every key currently linked to `list`, staged links included.
    pub fn unlink_all(&mut self, list: &ListKey) {
        let committed = self.base.links.get(list).into_iter().flatten().cloned();
        let staged: Vec<String> = self
            .staged
            .links
            .keys()
            .filter(|(staged_list, _)| staged_list == list)
            .map(|(_, key)| key.clone())
            .collect();
        for key in committed.chain(staged) {
            self.staged.links.insert((list.clone(), key), false);
        }
    }

    pub fn linked_keys(&self, list: &ListKey) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self.base.links.get(list).cloned().unwrap_or_default();
        for ((staged_list, key), linked) in &self.staged.links {
            if staged_list != list {
                continue;
            }
            if *linked {
                keys.insert(key.clone());
            } else {
                keys.remove(key);
            }
        }
        keys
    }
}

impl StagedWrites {
    /// Applies the staged writes, skipping no-ops, and reports the net changes.
    fn commit(self, tables: &mut StoreTables, transaction: u64) -> ChangeSet {
        let mut change_set = ChangeSet {
            transaction,
            ..ChangeSet::default()
        };

        for ((kind, key), staged) in self.records {
            let table = tables.records.entry(kind).or_default();
            let change = match (table.get(&key), &staged) {
                (None, Some(_)) => RecordChangeKind::Insert,
                (Some(current), Some(next)) if current != next => RecordChangeKind::Update,
                (Some(_), None) => RecordChangeKind::Delete,
                _ => continue,
            };
            match staged {
                Some(record) => {
                    table.insert(key.clone(), record);
                }
                None => {
                    table.remove(&key);
                }
            }
            change_set.entities.push(RecordChange { kind, key, change });
        }

        for ((list, key), linked) in self.links {
            let keys = tables.links.entry(list.clone()).or_default();
            let changed = if linked {
                keys.insert(key.clone())
            } else {
                keys.remove(&key)
            };
            if keys.is_empty() {
                tables.links.remove(&list);
            }
            if changed {
                change_set.links.push(LinkChange { list, key, linked });
            }
        }

        change_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::error::invalid_argument;
    use crate::state::model::timestamps::from_millis;
    use crate::state::model::{ChatUser, UserId, UserListSortingKey};
    use crate::state::query::{Filter, Sorting};

    fn user(id: &str, name: &str) -> ChatUser {
        let mut user = ChatUser::new(UserId::new(id), from_millis(0));
        user.name = Some(name.to_owned());
        user
    }

    fn recorder(store: &Arc<MemoryStore>) -> (StoreSubscription, Arc<StdMutex<Vec<ChangeSet>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = store.subscribe(move |_, change_set| {
            sink.lock().unwrap().push(change_set.clone());
        });
        (subscription, seen)
    }

    #[tokio::test]
    async fn commits_and_reports_net_changes() {
        let store = Arc::new(MemoryStore::new());
        let (_subscription, seen) = recorder(&store);
        let list = ListKey::new("users:all");

        store
            .write(|session| {
                session.save(&user("u1", "Ada"))?;
                session.save(&user("u2", "Bob"))?;
                session.link(&list, &UserId::new("u1"));
                session.link(&list, &UserId::new("u2"));
                session.unlink(&list, &UserId::new("u2"));
                Ok(())
            })
            .await
            .unwrap();

        // Saving identical payloads is a no-op and produces no notification.
        store
            .write(|session| session.save(&user("u1", "Ada")))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].entities.len(), 2);
        assert_eq!(
            seen[0].links,
            vec![LinkChange {
                list: list.clone(),
                key: "u1".into(),
                linked: true
            }]
        );
        assert_eq!(store.linked_keys(&list), vec!["u1".to_owned()]);
    }

    #[tokio::test]
    async fn failed_transactions_leave_no_trace() {
        let store = Arc::new(MemoryStore::new());
        let (_subscription, seen) = recorder(&store);

        let err = store
            .write(|session| {
                session.save(&user("u1", "Ada"))?;
                Err::<(), _>(invalid_argument("abort"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.code_str(), "chat-state/invalid-argument");
        assert_eq!(store.record_count(EntityKind::User), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_reads_see_staged_writes() {
        let store = MemoryStore::new();
        let list = ListKey::new("l");
        store
            .write(|session| {
                session.save(&user("u1", "Ada"))?;
                session.link(&list, &UserId::new("u1"));
                assert!(session.contains::<ChatUser>(&UserId::new("u1")));
                assert!(session.is_linked(&list, "u1"));
                let renamed =
                    session.update::<ChatUser, _>(&UserId::new("u1"), |u| u.role = "admin".into())?;
                assert_eq!(renamed.map(|u| u.role), Some("admin".to_owned()));
                session.unlink_all(&list);
                assert!(session.linked_keys(&list).is_empty());
                Ok(())
            })
            .await
            .unwrap();

        let stored = store.entity::<ChatUser>(&UserId::new("u1")).unwrap().unwrap();
        assert_eq!(stored.role, "admin");
        assert!(!store.is_linked(&list, "u1"));
    }

    #[tokio::test]
    async fn fetch_filters_sorts_and_limits() {
        let store = MemoryStore::new();
        store
            .write(|session| {
                session.save_all(&[user("u1", "Cleo"), user("u2", "Ada"), user("u3", "Bea")])
            })
            .await
            .unwrap();

        let spec = FetchSpecification::<ChatUser>::new(
            Filter::not_equal("name", "Cleo"),
            vec![Sorting::ascending(UserListSortingKey::Name)],
        );
        let names: Vec<_> = store
            .fetch(&spec)
            .unwrap()
            .iter()
            .map(|u| u.name.clone().unwrap())
            .collect();
        assert_eq!(names, ["Ada", "Bea"]);

        let limited = store.fetch(&spec.with_limit(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn malformed_records_fail_reads() {
        let store = MemoryStore::new();
        store
            .insert_raw_record(EntityKind::User, "bad", serde_json::json!({"id": 42}))
            .await
            .unwrap();
        let spec = FetchSpecification::<ChatUser>::new(Filter::All, Vec::new());
        let err = store.fetch(&spec).unwrap_err();
        assert_eq!(err.code_str(), "chat-state/store");
    }

    #[tokio::test]
    async fn remove_all_data_reports_reset() {
        let store = Arc::new(MemoryStore::new());
        store
            .write(|session| session.save(&user("u1", "Ada")))
            .await
            .unwrap();
        let (_subscription, seen) = recorder(&store);

        store.remove_all_data().await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen[0].reset);
        assert_eq!(
            seen[0].change_for(EntityKind::User, "u1"),
            Some(RecordChangeKind::Delete)
        );
        assert_eq!(store.record_count(EntityKind::User), 0);
    }

    #[test]
    fn cancel_is_idempotent_and_drop_unregisters() {
        let store = Arc::new(MemoryStore::new());
        let mut first = store.subscribe(|_, _| {});
        let second = store.subscribe(|_, _| {});
        assert_eq!(store.subscriber_count(), 2);

        first.cancel();
        first.cancel();
        assert!(first.is_cancelled());
        assert_eq!(store.subscriber_count(), 1);

        drop(second);
        assert_eq!(store.subscriber_count(), 0);
    }
}
