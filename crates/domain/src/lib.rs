//! Shared domain types for all Parley crates: the config tree, the error
//! taxonomy, conversation/turn types, streaming events, and the abstract
//! collaborator interfaces (channels, memory, secrets, scheduler).

pub mod cancel;
pub mod channel;
pub mod config;
pub mod convo;
pub mod error;
pub mod memory;
pub mod schedule;
pub mod secrets;
pub mod stream;
pub mod trace;
pub mod turn;

pub use error::{Error, ErrorClass, Result};
