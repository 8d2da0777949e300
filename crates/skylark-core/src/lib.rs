//! Orchestration logic and port trait definitions for Skylark.
//!
//! This crate defines the "ports" (store, transport, LLM and plugin traits)
//! that the infrastructure layer implements, and the components built on
//! them: the policy engine, subscription manager, plugin runtime, stream
//! dispatcher, response pipeline, command interpreter and auto-poster.
//! It depends only on `skylark-types` -- never on `skylark-infra`.

pub mod agent;
pub mod autopost;
pub mod clock;
pub mod command;
pub mod llm;
pub mod maintenance;
pub mod model;
pub mod pipeline;
pub mod plugin;
pub mod policy;
pub mod storage;
pub mod stream;
pub mod subscription;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
