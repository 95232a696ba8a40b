//! Tools the conversational agent can call, and their executor.

pub mod catalogue;
pub mod executor;

pub use catalogue::{TaskCommand, TaskTool, tool_definitions};
pub use executor::{ToolExecutor, ToolInvocationRequest, ToolInvocationResult, ToolOutcome};
