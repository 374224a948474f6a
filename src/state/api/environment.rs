use std::sync::Arc;

use crate::client::ChatClientConfig;
use crate::state::events::EventFeed;
use crate::state::observer::ConsumptionContext;
use crate::state::remote::{PageResult, RemoteService};
use crate::state::error::StateResult;
use crate::state::store::MemoryStore;

/// Future of one remote page, boxed so facades can store their fetch closures.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) type PageFuture<T> = futures::future::BoxFuture<'static, StateResult<PageResult<T>>>;
#[cfg(target_arch = "wasm32")]
pub(crate) type PageFuture<T> =
    futures::future::LocalBoxFuture<'static, StateResult<PageResult<T>>>;

/// Everything a facade needs from its client, passed down explicitly.
#[derive(Clone)]
pub(crate) struct Environment {
    pub store: Arc<MemoryStore>,
    pub remote: Arc<dyn RemoteService>,
    pub events: EventFeed,
    pub context: ConsumptionContext,
    pub config: Arc<ChatClientConfig>,
}

impl Environment {
    /// Runs `job` on the consumption context.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.context.dispatch(job);
    }
}
