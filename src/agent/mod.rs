//! Conversational agent and the turn orchestrator that drives it.

pub mod adapter;
pub mod prompt;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_support;

pub use adapter::{AgentResponse, ConversationalAgent, ToolRound};
pub use turn::{Operation, Turn, TurnOrchestrator, TurnOutcome, TurnState};
