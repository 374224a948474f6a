//! Runtime helpers that hide the difference between native (tokio) and wasm hosts.

pub mod runtime;
