//! Turn orchestrator: one user message in, one assistant message out.
//!
//! A turn walks an explicit state machine:
//!
//! ```text
//! Received -> Validated -> HistoryLoaded -> AgentInvoked
//!     -> ToolsExecuting (repeats per tool round) -> AgentFinalized
//!     -> Persisted -> Completed
//! ```
//!
//! `Failed` is reachable from every non-terminal state. The user's message is
//! persisted at `Validated -> HistoryLoaded` and is never rolled back. An
//! assistant message is written only on the way to `Persisted`.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::adapter::{AgentResponse, ConversationalAgent, ToolRound};
use crate::agent::prompt::FALLBACK_REPLY;
use crate::chat::log::{EMPTY_MESSAGE, MessageLog};
use crate::chat::model::{ConversationMessage, Sender};
use crate::config::AgentConfig;
use crate::error::{ChatError, LlmError};
use crate::tools::{ToolExecutor, ToolInvocationRequest, ToolInvocationResult};

/// State of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Received,
    Validated,
    HistoryLoaded,
    AgentInvoked,
    ToolsExecuting,
    AgentFinalized,
    Persisted,
    Completed,
    Failed,
}

impl TurnState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TurnState) -> bool {
        use TurnState::*;

        if target == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, target),
            (Received, Validated)
                | (Validated, HistoryLoaded)
                | (HistoryLoaded, AgentInvoked)
                | (AgentInvoked, ToolsExecuting)
                | (AgentInvoked, AgentFinalized)
                | (ToolsExecuting, ToolsExecuting)
                | (ToolsExecuting, AgentFinalized)
                | (AgentFinalized, Persisted)
                | (Persisted, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::HistoryLoaded => "history_loaded",
            Self::AgentInvoked => "agent_invoked",
            Self::ToolsExecuting => "tools_executing",
            Self::AgentFinalized => "agent_finalized",
            Self::Persisted => "persisted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: TurnState,
    pub to: TurnState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Working state of one turn. Never persisted as a unit.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: Uuid,
    pub user_id: String,
    pub raw_message: String,
    /// Trimmed message, set once validated.
    pub message: Option<String>,
    pub user_message: Option<ConversationMessage>,
    pub history: Vec<ConversationMessage>,
    pub rounds: Vec<ToolRound>,
    pub reply: Option<String>,
    pub assistant_message: Option<ConversationMessage>,
    state: TurnState,
    transitions: Vec<StateTransition>,
}

impl Turn {
    pub fn new(user_id: impl Into<String>, raw_message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            raw_message: raw_message.into(),
            message: None,
            user_message: None,
            history: Vec::new(),
            rounds: Vec::new(),
            reply: None,
            assistant_message: None,
            state: TurnState::Received,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Every tool result of the turn, in execution order.
    pub fn results(&self) -> impl Iterator<Item = &ToolInvocationResult> {
        self.rounds.iter().flat_map(|r| r.results.iter())
    }

    pub fn transition_to(
        &mut self,
        new_state: TurnState,
        reason: Option<String>,
    ) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.state, new_state
            ));
        }

        debug!(turn_id = %self.id, from = %self.state, to = %new_state, "Turn transition");
        self.transitions.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Utc::now(),
            reason,
        });
        self.state = new_state;
        Ok(())
    }

    fn advance(&mut self, new_state: TurnState) {
        if let Err(e) = self.transition_to(new_state, None) {
            // Only reachable through a sequencing bug in the orchestrator.
            warn!(turn_id = %self.id, error = %e, "Invalid turn transition");
        }
    }

    fn fail(&mut self, reason: &str) {
        if !self.state.is_terminal() {
            self.advance_with_reason(TurnState::Failed, reason);
        }
    }

    fn advance_with_reason(&mut self, new_state: TurnState, reason: &str) {
        if let Err(e) = self.transition_to(new_state, Some(reason.to_string())) {
            warn!(turn_id = %self.id, error = %e, "Invalid turn transition");
        }
    }
}

/// One entry of the operation log returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    pub name: String,
    pub outcome: String,
    pub detail: String,
}

impl From<&ToolInvocationResult> for Operation {
    fn from(result: &ToolInvocationResult) -> Self {
        Self {
            name: result.name.clone(),
            outcome: result.outcome_label().to_string(),
            detail: result.summary.clone(),
        }
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: Uuid,
    pub user_message: ConversationMessage,
    pub assistant_message: ConversationMessage,
    pub reply: String,
    pub timestamp: DateTime<Utc>,
    pub operations: Vec<Operation>,
}

pub struct TurnOrchestrator {
    log: MessageLog,
    agent: ConversationalAgent,
    executor: ToolExecutor,
    config: AgentConfig,
}

impl TurnOrchestrator {
    pub fn new(
        log: MessageLog,
        agent: ConversationalAgent,
        executor: ToolExecutor,
        config: AgentConfig,
    ) -> Self {
        Self {
            log,
            agent,
            executor,
            config,
        }
    }

    /// Run a full turn for an authenticated user.
    pub async fn submit(&self, user_id: &str, raw_message: &str) -> Result<TurnOutcome, ChatError> {
        let mut turn = Turn::new(user_id, raw_message);
        self.run(&mut turn).await
    }

    /// Drive `turn` to a terminal state within the configured deadline.
    /// On failure the turn is left in `Failed` for inspection.
    pub async fn run(&self, turn: &mut Turn) -> Result<TurnOutcome, ChatError> {
        let deadline = self.config.turn_timeout;
        let result = match tokio::time::timeout(deadline, self.drive(turn)).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::Timeout(deadline)),
        };

        match result {
            Ok(outcome) => {
                info!(
                    turn_id = %turn.id,
                    user_id = %turn.user_id,
                    operations = outcome.operations.len(),
                    "Turn completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(
                    turn_id = %turn.id,
                    user_id = %turn.user_id,
                    state = %turn.state(),
                    error = %err,
                    "Turn failed"
                );
                turn.fail(&err.to_string());
                Err(err)
            }
        }
    }

    async fn drive(&self, turn: &mut Turn) -> Result<TurnOutcome, ChatError> {
        // Received -> Validated
        let message = turn.raw_message.trim().to_string();
        if message.is_empty() {
            return Err(ChatError::Validation(EMPTY_MESSAGE.to_string()));
        }
        turn.message = Some(message.clone());
        turn.advance(TurnState::Validated);

        // Validated -> HistoryLoaded
        let user_message = self.log.append(&turn.user_id, &message, Sender::User).await?;
        let user_message_id = user_message.id;
        turn.user_message = Some(user_message.clone());

        let window = self.config.history_window;
        let mut history = self.log.recent(&turn.user_id, window + 1).await?;
        history.retain(|m| m.id != user_message_id);
        if history.len() > window {
            history.drain(..history.len() - window);
        }
        turn.history = history;
        turn.advance(TurnState::HistoryLoaded);

        // HistoryLoaded -> AgentInvoked
        let mut response = self
            .with_retries(turn.id, || {
                self.agent
                    .process_message(&turn.user_id, &message, &turn.history)
            })
            .await?;
        turn.advance(TurnState::AgentInvoked);

        // AgentInvoked -> ToolsExecuting* -> AgentFinalized
        let reply = if response.tool_calls.is_empty() {
            response.text.unwrap_or_else(|| FALLBACK_REPLY.to_string())
        } else {
            loop {
                turn.advance(TurnState::ToolsExecuting);
                let round = self.execute_round(turn, response).await;
                turn.rounds.push(round);

                if turn.rounds.len() >= self.config.max_tool_rounds {
                    let summary = self
                        .with_retries(turn.id, || {
                            self.agent
                                .summarize(&turn.user_id, &message, &turn.history, &turn.rounds)
                        })
                        .await?;
                    break summary.unwrap_or_else(|| render_local_summary(turn));
                }

                response = self
                    .with_retries(turn.id, || {
                        self.agent
                            .follow_up(&turn.user_id, &message, &turn.history, &turn.rounds)
                    })
                    .await?;
                if response.tool_calls.is_empty() {
                    break response.text.unwrap_or_else(|| render_local_summary(turn));
                }
            }
        };
        turn.reply = Some(reply.clone());
        turn.advance(TurnState::AgentFinalized);

        // AgentFinalized -> Persisted
        let assistant_message = self
            .log
            .append(&turn.user_id, &reply, Sender::Assistant)
            .await?;
        turn.assistant_message = Some(assistant_message.clone());
        turn.advance(TurnState::Persisted);

        // Persisted -> Completed
        let operations = turn.results().map(Operation::from).collect();
        turn.advance(TurnState::Completed);

        Ok(TurnOutcome {
            turn_id: turn.id,
            user_message,
            timestamp: assistant_message.created_at,
            reply: assistant_message.content.clone(),
            assistant_message,
            operations,
        })
    }

    /// Execute the proposed calls strictly in order, one at a time.
    async fn execute_round(&self, turn: &Turn, response: AgentResponse) -> ToolRound {
        let mut results = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            let request = ToolInvocationRequest {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                turn_id: turn.id,
            };
            results.push(self.executor.execute(&turn.user_id, &request).await);
        }
        ToolRound {
            assistant_text: response.text,
            calls: response.tool_calls,
            results,
        }
    }

    /// Retry transient upstream failures. Agent calls have no side effects,
    /// so a retry never repeats tool execution.
    async fn with_retries<T, F, Fut>(&self, turn_id: Uuid, mut call: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.config.max_upstream_retries => {
                    attempt += 1;
                    warn!(%turn_id, attempt, error = %err, "Transient upstream failure, retrying");
                    tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Reply built from the operation log when the model gives no summary text.
fn render_local_summary(turn: &Turn) -> String {
    let lines: Vec<String> = turn
        .results()
        .map(|r| {
            if r.is_success() {
                r.summary.clone()
            } else {
                format!("Could not complete {}: {}", r.name, r.summary)
            }
        })
        .collect();
    if lines.is_empty() {
        FALLBACK_REPLY.to_string()
    } else {
        lines.join("\n")
    }
}
