//! Scripted LLM used by the agent and orchestrator unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};

pub(crate) enum Reply {
    Text(String),
    Calls(Option<String>, Vec<ToolCall>),
    Fail(LlmError),
    Hang,
}

impl Reply {
    pub(crate) fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub(crate) fn calls(calls: Vec<(&str, serde_json::Value)>) -> Self {
        Self::Calls(
            None,
            calls
                .into_iter()
                .enumerate()
                .map(|(i, (name, arguments))| ToolCall {
                    id: format!("call_{i}"),
                    name: name.to_string(),
                    arguments,
                })
                .collect(),
        )
    }

    pub(crate) fn unavailable() -> Self {
        Self::Fail(LlmError::Unavailable {
            provider: "scripted".into(),
            reason: "connection refused".into(),
        })
    }
}

pub(crate) struct Recorded {
    pub messages: Vec<ChatMessage>,
    pub with_tools: bool,
}

/// Pops one scripted reply per call, in order, from either entry point.
pub(crate) struct ScriptedLlm {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedLlm {
    pub(crate) fn new(script: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| Recorded {
                messages: r.messages.clone(),
                with_tools: r.with_tools,
            })
            .collect()
    }

    async fn next(
        &self,
        messages: Vec<ChatMessage>,
        with_tools: bool,
    ) -> Result<(Option<String>, Vec<ToolCall>), LlmError> {
        self.requests.lock().unwrap().push(Recorded {
            messages,
            with_tools,
        });
        let reply = self.script.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok((Some(text), Vec::new())),
            Some(Reply::Calls(text, calls)) => Ok((text, calls)),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok((None, Vec::new()))
            }
            None => Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "script exhausted".into(),
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (text, _) = self.next(request.messages, false).await?;
        Ok(CompletionResponse {
            content: text.unwrap_or_default(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let (content, tool_calls) = self.next(request.messages, true).await?;
        Ok(ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}
