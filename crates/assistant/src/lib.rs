//! Assistant orchestrator: wires sessions, queueing, prompt composition,
//! the agent loop, tool dispatch, model failover, block streaming and
//! lane-based concurrency into one message → one completed turn.

pub mod bootstrap;
pub mod channels;
pub mod cli;
pub mod runtime;
pub mod state;

pub use state::AppState;
