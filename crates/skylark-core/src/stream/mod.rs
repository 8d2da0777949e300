//! Streaming event dispatcher.
//!
//! One task owns the streaming connection ([`dispatcher::StreamDispatcher`]):
//! it joins the desired channels, decodes frames ([`frame`]), drops
//! duplicates ([`dedup`]) and hands events to a pool of sharded workers
//! ([`workers`]) that preserve per-user order.

pub mod backoff;
pub mod dedup;
pub mod dispatcher;
pub mod frame;
pub mod workers;

pub use dispatcher::{StreamDispatcher, StreamStatus};
pub use workers::{EventHandler, WorkerPool};
