//! Shared domain types for Skylark.
//!
//! This crate contains the domain types used across the Skylark bot agent:
//! user keys, conversation state, channel subscriptions, plugin records,
//! post quotas, decoded stream events, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod llm;
pub mod plugin;
pub mod quota;
pub mod subscription;
pub mod user;
