//! Operator control plane: parse a prefixed chat message, mutate live state,
//! answer with plain text.

pub mod interpreter;
pub mod parser;

pub use interpreter::CommandInterpreter;
pub use parser::{CacheScope, Command, SetAction};
