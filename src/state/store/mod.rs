//! Transactional in-memory store and the change sets it publishes.

mod change_set;
mod memory;

pub use change_set::{ChangeSet, LinkChange, RecordChange, RecordChangeKind};
pub use memory::{MemoryStore, StoreSession, StoreSubscription};
