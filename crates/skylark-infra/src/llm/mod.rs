//! Language-model backends.

pub mod openai;

pub use openai::OpenAiProvider;
