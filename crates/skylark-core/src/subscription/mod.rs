//! Channel subscriptions: the live desired set and antenna name resolution.

pub mod antenna;
pub mod manager;

pub use manager::SubscriptionManager;
