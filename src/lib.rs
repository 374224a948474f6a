#![doc = include_str!("RUSTDOC.md")]

pub mod client;
pub mod logger;
pub mod platform;
pub mod state;

#[cfg(test)]
mod test_support;
