//! Scheduled autonomous posting under a daily quota.

pub mod scheduler;

pub use scheduler::{AutoPostSettings, AutoPoster, CycleOutcome, PostSource};
