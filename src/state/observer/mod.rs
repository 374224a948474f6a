//! Observers turning store change sets into snapshots, diffs and entity changes.

mod context;
mod entity;
mod list;
mod stream;

pub use context::{ConsumptionContext, DeliveryMode};
pub use entity::{EntityChange, EntityObserver};
pub use list::{DiffStream, ListObserver, ListUpdate};
pub use stream::ChangeStream;
