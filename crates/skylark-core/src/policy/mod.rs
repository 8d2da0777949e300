//! Conversation policy: allow/deny lists plus the per-user rate and turn
//! limiter.

pub mod engine;
pub mod lists;
