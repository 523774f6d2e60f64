/// Shared modules for the whale tape
pub mod config;
pub mod dedup;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod sse;
pub mod stream;
pub mod tape;
pub mod types;
pub mod watchlist;
pub mod widget;

#[cfg(test)]
pub(crate) mod test_support;
