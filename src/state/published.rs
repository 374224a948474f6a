use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, RwLockReadGuard, Weak};

type Subscriber<S> = Arc<dyn Fn(&S) + Send + Sync + 'static>;

/// Observable state owned by a facade.
///
/// Facades mutate the value on their consumption context only; readers get
/// clones (or a read guard) and may subscribe to every change.
pub struct Published<S> {
    inner: Arc<PublishedInner<S>>,
}

impl<S> Clone for Published<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PublishedInner<S> {
    value: RwLock<S>,
    version: AtomicU64,
    subscribers: StdMutex<BTreeMap<u64, Subscriber<S>>>,
    waiters: StdMutex<Vec<async_channel::Sender<()>>>,
    next_subscriber: AtomicU64,
}

impl<S: Clone + Send + Sync + 'static> Published<S> {
    pub fn new(value: S) -> Self {
        Self {
            inner: Arc::new(PublishedInner {
                value: RwLock::new(value),
                version: AtomicU64::new(0),
                subscribers: StdMutex::new(BTreeMap::new()),
                waiters: StdMutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    pub fn get(&self) -> S {
        self.read().clone()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of updates applied so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    pub(crate) fn update(&self, mutate: impl FnOnce(&mut S)) {
        let value = {
            let mut value = self
                .inner
                .value
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            mutate(&mut value);
            value.clone()
        };
        self.inner.version.fetch_add(1, Ordering::SeqCst);

        let subscribers: Vec<Subscriber<S>> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for subscriber in subscribers {
            subscriber(&value);
        }
        let waiters = std::mem::take(
            &mut *self
                .inner
                .waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for waiter in waiters {
            let _ = waiter.try_send(());
        }
    }

    /// Calls `callback` with the new value after every update until the returned
    /// handle is dropped.
    pub fn subscribe<F>(&self, callback: F) -> PublishedSubscription<S>
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        PublishedSubscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Resolves with the first value satisfying `predicate`, checking the
    /// current value first.
    pub async fn wait_until<P>(&self, predicate: P) -> S
    where
        P: Fn(&S) -> bool,
    {
        loop {
            let (waiter, woken) = async_channel::bounded(1);
            self.inner
                .waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(waiter);
            let value = self.get();
            if predicate(&value) {
                return value;
            }
            let _ = woken.recv().await;
        }
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for Published<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self
            .inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Published")
            .field("value", &*value)
            .field("version", &self.inner.version.load(Ordering::SeqCst))
            .finish()
    }
}

pub struct PublishedSubscription<S> {
    inner: Weak<PublishedInner<S>>,
    id: u64,
}

impl<S> Drop for PublishedSubscription<S> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}
