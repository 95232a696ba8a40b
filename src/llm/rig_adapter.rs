//! Bridges rig-core's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

/// Wraps any rig completion model.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
    provider: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: provider.to_string(),
        }
    }
}

/// What rig hands back, flattened.
struct RawOutput {
    text: Option<String>,
    tool_calls: Vec<ToolCall>,
    input_tokens: u32,
    output_tokens: u32,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    async fn send(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<RawOutput, LlmError> {
        let (preamble, history, prompt) = split_transcript(messages).map_err(|reason| {
            LlmError::RequestFailed {
                provider: self.provider.clone(),
                reason,
            }
        })?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if !tools.is_empty() {
            builder = builder.tools(
                tools
                    .into_iter()
                    .map(|t| rig::completion::ToolDefinition {
                        name: t.name,
                        description: t.description,
                        parameters: t.parameters,
                    })
                    .collect(),
            );
        }
        if let Some(temperature) = temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| map_error(&self.provider, e))?;

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        for content in response.choice.iter() {
            match content {
                AssistantContent::Text(t) => texts.push(t.text.clone()),
                AssistantContent::ToolCall(c) => tool_calls.push(ToolCall {
                    id: c.id.clone(),
                    name: c.function.name.clone(),
                    arguments: normalize_arguments(&c.function.arguments).map_err(|reason| {
                        LlmError::InvalidResponse {
                            provider: self.provider.clone(),
                            reason,
                        }
                    })?,
                }),
                _ => {}
            }
        }

        let text = texts.join("\n");
        Ok(RawOutput {
            text: (!text.trim().is_empty()).then_some(text),
            tool_calls,
            input_tokens: saturating_u32(response.usage.input_tokens),
            output_tokens: saturating_u32(response.usage.output_tokens),
        })
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let out = self
            .send(request.messages, Vec::new(), request.temperature, request.max_tokens)
            .await?;
        Ok(CompletionResponse {
            content: out.text.unwrap_or_default(),
            input_tokens: out.input_tokens,
            output_tokens: out.output_tokens,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let out = self
            .send(
                request.messages,
                request.tools,
                request.temperature,
                request.max_tokens,
            )
            .await?;
        let finish_reason = if out.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolUse
        };
        Ok(ToolCompletionResponse {
            content: out.text,
            tool_calls: out.tool_calls,
            input_tokens: out.input_tokens,
            output_tokens: out.output_tokens,
            finish_reason,
        })
    }
}

/// Splits a transcript into rig's shape: system text becomes the preamble,
/// the final user message becomes the prompt, everything else is history.
fn split_transcript(
    messages: Vec<ChatMessage>,
) -> Result<(Option<String>, Vec<Message>, Message), String> {
    let mut system = Vec::new();
    let mut rest = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => system.push(msg.content),
            _ => rest.push(msg),
        }
    }

    let prompt = match rest.pop() {
        Some(last) if last.role == Role::User => Message::user(last.content),
        _ => return Err("transcript must end with a user message".to_string()),
    };

    let history = rest
        .into_iter()
        .map(|m| match m.role {
            Role::Assistant => Message::assistant(m.content),
            _ => Message::user(m.content),
        })
        .collect();

    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));
    Ok((preamble, history, prompt))
}

/// Some providers return arguments as a JSON-encoded string rather than an object.
fn normalize_arguments(args: &serde_json::Value) -> Result<serde_json::Value, String> {
    match args {
        serde_json::Value::String(raw) if raw.trim().is_empty() => Ok(serde_json::json!({})),
        serde_json::Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| format!("tool arguments are not valid JSON: {e}")),
        serde_json::Value::Null => Ok(serde_json::json!({})),
        other => Ok(other.clone()),
    }
}

/// Translate a rig failure into the provider error taxonomy. Rate limits and
/// rejected credentials are recognised from the status or message the
/// provider reported, since rig surfaces both as plain text.
fn map_error(provider: &str, err: CompletionError) -> LlmError {
    let provider = provider.to_string();
    let text = err.to_string().to_ascii_lowercase();
    if is_rate_limit(&text) {
        return LlmError::RateLimited {
            provider,
            retry_after: None,
        };
    }
    if is_auth_failure(&text) {
        return LlmError::AuthFailed { provider };
    }
    match err {
        CompletionError::ProviderError(reason) => LlmError::RequestFailed { provider, reason },
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse { provider, reason },
        CompletionError::JsonError(e) => LlmError::InvalidResponse {
            provider,
            reason: e.to_string(),
        },
        other => LlmError::Unavailable {
            provider,
            reason: other.to_string(),
        },
    }
}

fn is_rate_limit(text: &str) -> bool {
    ["429", "rate limit", "rate_limit", "too many requests"]
        .iter()
        .any(|needle| text.contains(needle))
}

fn is_auth_failure(text: &str) -> bool {
    [
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "invalid x-api-key",
        "authentication",
    ]
    .iter()
    .any(|needle| text.contains(needle))
}

fn saturating_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
