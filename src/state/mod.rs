//! # Chat state layer
//!
//! Keeps a local store of chat entities in step with a remote service and
//! exposes ordered, observable, paginated lists of them.
//!
//! - [`store`]: transactional in-memory store publishing a change set per commit
//! - [`observer`]: list and entity observers turning change sets into snapshots and diffs
//! - [`diff`]: the change diff engine between two ordered snapshots
//! - [`pagination_state`]: the pagination state machine and its merge policies
//! - [`orchestrator`]: fetches pages and commits them to linked lists
//! - [`linking`] and [`events`]: keep list membership current as events arrive
//! - [`api`]: the consumer facades built from all of the above

pub mod api;
pub(crate) mod constants;
pub mod diff;
pub mod error;
pub mod events;
pub mod linking;
pub(crate) mod logger;
pub mod model;
pub mod observer;
pub mod orchestrator;
pub mod pagination_state;
pub mod published;
pub mod query;
pub mod remote;
pub mod snapshot;
pub mod store;
