//! Conversational agent adapter: the only code that talks to the model.
//!
//! Builds the transcript (system instruction, history oldest first, the new
//! message, then any tool rounds so far), advertises the tool catalogue, and
//! turns the model's output into an `AgentResponse`. No retries here; the
//! turn orchestrator owns retry policy.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::agent::prompt::{SUMMARY_INSTRUCTION, SYSTEM_PROMPT};
use crate::chat::model::{ConversationMessage, Sender};
use crate::config::AgentConfig;
use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, ToolCall, ToolCompletionRequest,
    ToolCompletionResponse,
};
use crate::tools::{ToolInvocationResult, ToolOutcome, tool_definitions};

/// Parsed model output: optional text and tool calls in proposed order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// One round of tool use: what the model asked for and what happened.
#[derive(Debug, Clone)]
pub struct ToolRound {
    pub assistant_text: Option<String>,
    pub calls: Vec<ToolCall>,
    pub results: Vec<ToolInvocationResult>,
}

pub struct ConversationalAgent {
    llm: Arc<dyn LlmProvider>,
    config: AgentConfig,
}

impl ConversationalAgent {
    pub fn new(llm: Arc<dyn LlmProvider>, config: AgentConfig) -> Self {
        Self { llm, config }
    }

    /// First round: the user's message with history and the tool catalogue.
    pub async fn process_message(
        &self,
        user_id: &str,
        message: &str,
        history: &[ConversationMessage],
    ) -> Result<AgentResponse, LlmError> {
        self.follow_up(user_id, message, history, &[]).await
    }

    /// Another tool-enabled round after `rounds` have been executed.
    pub async fn follow_up(
        &self,
        user_id: &str,
        message: &str,
        history: &[ConversationMessage],
        rounds: &[ToolRound],
    ) -> Result<AgentResponse, LlmError> {
        let messages = build_transcript(message, history, rounds);
        info!(
            user_id,
            history = history.len(),
            rounds = rounds.len(),
            model = self.llm.model_name(),
            "Invoking agent"
        );

        let request = ToolCompletionRequest::new(messages, tool_definitions())
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);
        let response = self.bounded(self.llm.complete_with_tools(request)).await?;

        debug!(
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            tool_calls = response.tool_calls.len(),
            "Agent responded"
        );
        self.parse_response(response)
    }

    /// Tool-free round asking for the final natural-language reply.
    /// `None` when the model returns no usable text.
    pub async fn summarize(
        &self,
        user_id: &str,
        message: &str,
        history: &[ConversationMessage],
        rounds: &[ToolRound],
    ) -> Result<Option<String>, LlmError> {
        let mut messages = build_transcript(message, history, rounds);
        if let Some(last) = messages.last_mut() {
            last.content.push_str("\n\n");
            last.content.push_str(SUMMARY_INSTRUCTION);
        }
        info!(user_id, rounds = rounds.len(), "Requesting summary");

        let request = CompletionRequest::new(messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);
        let response = self.bounded(self.llm.complete(request)).await?;
        Ok(non_blank(Some(response.content)))
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, LlmError>>,
    ) -> Result<T, LlmError> {
        let limit = self.config.request_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.llm.model_name().to_string(),
                timeout: limit,
            })?
    }

    fn parse_response(&self, response: ToolCompletionResponse) -> Result<AgentResponse, LlmError> {
        let malformed = |reason: String| LlmError::InvalidResponse {
            provider: self.llm.model_name().to_string(),
            reason,
        };

        let mut tool_calls = Vec::with_capacity(response.tool_calls.len());
        for (idx, mut call) in response.tool_calls.into_iter().enumerate() {
            if call.name.trim().is_empty() {
                return Err(malformed(format!("tool call #{idx} has no name")));
            }
            match call.arguments {
                Value::Object(_) => {}
                Value::Null => call.arguments = Value::Object(Default::default()),
                _ => {
                    return Err(malformed(format!(
                        "arguments of tool call '{}' are not an object",
                        call.name
                    )));
                }
            }
            if call.id.trim().is_empty() {
                call.id = format!("call_{idx}");
            }
            tool_calls.push(call);
        }

        Ok(AgentResponse {
            text: non_blank(response.content),
            tool_calls,
        })
    }
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn build_transcript(
    message: &str,
    history: &[ConversationMessage],
    rounds: &[ToolRound],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2 + rounds.len() * 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    messages.extend(history.iter().map(|m| match m.sender {
        Sender::User => ChatMessage::user(&m.content),
        Sender::Assistant => ChatMessage::assistant(&m.content),
    }));
    messages.push(ChatMessage::user(message));

    for round in rounds {
        messages.push(ChatMessage::assistant(render_calls(round)));
        messages.push(ChatMessage::user(render_results(round)));
    }
    messages
}

fn render_calls(round: &ToolRound) -> String {
    let mut out = String::new();
    if let Some(text) = &round.assistant_text {
        out.push_str(text);
        out.push_str("\n\n");
    }
    out.push_str("[tool calls]");
    for call in &round.calls {
        out.push_str(&format!("\n- {} {}", call.name, call.arguments));
    }
    out
}

fn render_results(round: &ToolRound) -> String {
    let mut out = String::from("[tool results]");
    for result in &round.results {
        out.push_str(&format!(
            "\n- {} ({}): {}",
            result.name,
            result.outcome_label(),
            result.summary
        ));
        if let ToolOutcome::Success(value) = &result.outcome {
            out.push_str(&format!("\n  data: {value}"));
        }
    }
    out
}
