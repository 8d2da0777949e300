//! Language-model port.

pub mod box_provider;
pub mod provider;
