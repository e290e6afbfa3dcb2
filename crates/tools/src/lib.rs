//! Tool registry, guard, approvals, audit, loop detection, and the
//! dispatch engine that runs model-requested tool calls.

pub mod approval;
pub mod audit;
pub mod builtin;
pub mod containment;
pub mod context;
pub mod executor;
pub mod guard;
pub mod loopdetect;
pub mod registry;
pub mod schema;

pub use approval::{ApprovalBroker, ApprovalDecision, ApprovalRequest};
pub use context::ToolCtx;
pub use executor::ToolExecutor;
pub use guard::Guard;
pub use registry::{ToolEntry, ToolHandler, ToolRegistry};
