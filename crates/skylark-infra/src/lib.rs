//! Infrastructure layer for Skylark.
//!
//! Contains implementations of the ports defined in `skylark-core`: the
//! SQLite store, the Misskey HTTP and streaming transport, the
//! OpenAI-compatible language model, the configuration loader and the
//! built-in plugins.

pub mod config;
pub mod llm;
pub mod misskey;
pub mod plugins;
pub mod sqlite;

#[cfg(test)]
mod testing;
