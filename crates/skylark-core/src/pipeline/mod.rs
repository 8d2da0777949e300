//! Response pipeline: per-user serialization and the event responder.

pub mod locks;
pub mod responder;

pub use locks::UserLocks;
pub use responder::Responder;
