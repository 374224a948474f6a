use std::fmt;

use serde::{Deserialize, Serialize};

use crate::platform::runtime::spawn_detached;
use crate::state::logger::OBSERVER_LOGGER;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How published-state updates reach their owners.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One background consumer applies updates in FIFO order.
    #[default]
    Serial,
    /// Updates run inline on the context that produced them.
    Immediate,
}

/// The single logical context on which owner callbacks and published-state
/// mutations run.
#[derive(Clone)]
pub enum ConsumptionContext {
    Immediate,
    Serial(async_channel::Sender<Job>),
}

impl fmt::Debug for ConsumptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumptionContext::Immediate => f.write_str("ConsumptionContext::Immediate"),
            ConsumptionContext::Serial(sender) => f
                .debug_struct("ConsumptionContext::Serial")
                .field("pending", &sender.len())
                .finish(),
        }
    }
}

impl ConsumptionContext {
    pub fn immediate() -> Self {
        ConsumptionContext::Immediate
    }

    /// Starts a consumer task draining jobs in dispatch order. The task ends once
    /// every clone of the context is dropped.
    pub fn serial() -> Self {
        let (sender, receiver) = async_channel::unbounded::<Job>();
        spawn_detached(async move {
            while let Ok(job) = receiver.recv().await {
                job();
            }
            OBSERVER_LOGGER.debug("Consumption context drained and closed");
        });
        ConsumptionContext::Serial(sender)
    }

    pub fn from_mode(mode: DeliveryMode) -> Self {
        match mode {
            DeliveryMode::Serial => Self::serial(),
            DeliveryMode::Immediate => Self::immediate(),
        }
    }

    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            ConsumptionContext::Immediate => job(),
            ConsumptionContext::Serial(sender) => {
                if let Err(err) = sender.try_send(Box::new(job)) {
                    // The consumer is gone; run inline rather than lose the update.
                    (err.into_inner())();
                }
            }
        }
    }

    /// Resolves once every job dispatched before the call has run.
    pub async fn flush(&self) {
        if let ConsumptionContext::Serial(_) = self {
            let (done, finished) = async_channel::bounded::<()>(1);
            self.dispatch(move || {
                let _ = done.try_send(());
            });
            let _ = finished.recv().await;
        }
    }
}
