//! Configuration types.
//!
//! Everything is read from the process environment once at startup.
//! `from_lookup` takes the variable source as a closure so tests can supply
//! a map instead of mutating the real environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Conversational agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Sampling temperature passed to the model.
    pub temperature: f32,
    /// Maximum output tokens per model call.
    pub max_tokens: u32,
    /// Timeout for a single upstream model call.
    pub request_timeout: Duration,
    /// Deadline for an entire turn, both agent rounds and tool execution included.
    pub turn_timeout: Duration,
    /// Number of most recent messages supplied to the agent as context.
    pub history_window: usize,
    /// Extra attempts for transient upstream failures.
    pub max_upstream_retries: u32,
    /// Tool rounds allowed per turn before the agent must answer in text.
    pub max_tool_rounds: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
            request_timeout: Duration::from_secs(30),
            turn_timeout: Duration::from_secs(60),
            history_window: 10,
            max_upstream_retries: 1,
            max_tool_rounds: 3,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub cors_origins: Vec<String>,
    /// Chat submissions allowed per user per minute.
    pub rate_limit_per_minute: u32,
    /// Bearer token to user id.
    pub api_tokens: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            db_path: PathBuf::from("./data/todo-chat.db"),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8000".to_string(),
            ],
            rate_limit_per_minute: 10,
            api_tokens: HashMap::new(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend: LlmBackend = parse_or(&lookup, "TODO_CHAT_LLM_BACKEND", LlmBackend::OpenAi)?;

        let key_var = match backend {
            LlmBackend::OpenAi => "OPENAI_API_KEY",
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
        };
        let api_key = lookup(key_var)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let model = lookup("TODO_CHAT_MODEL").unwrap_or_else(|| backend.default_model().to_string());

        let defaults = AgentConfig::default();
        let agent = AgentConfig {
            temperature: parse_or(&lookup, "TODO_CHAT_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_or(&lookup, "TODO_CHAT_MAX_TOKENS", defaults.max_tokens)?,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "TODO_CHAT_LLM_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            turn_timeout: Duration::from_secs(parse_or(
                &lookup,
                "TODO_CHAT_TURN_TIMEOUT_SECS",
                defaults.turn_timeout.as_secs(),
            )?),
            history_window: parse_or(&lookup, "TODO_CHAT_HISTORY_WINDOW", defaults.history_window)?,
            max_upstream_retries: parse_or(
                &lookup,
                "TODO_CHAT_UPSTREAM_RETRIES",
                defaults.max_upstream_retries,
            )?,
            max_tool_rounds: parse_or(&lookup, "TODO_CHAT_MAX_TOOL_ROUNDS", defaults.max_tool_rounds)?,
        };

        for (key, value) in [
            ("TODO_CHAT_HISTORY_WINDOW", agent.history_window),
            ("TODO_CHAT_MAX_TOOL_ROUNDS", agent.max_tool_rounds),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }

        let server_defaults = ServerConfig::default();
        let cors_origins = match lookup("TODO_CHAT_CORS_ORIGINS") {
            Some(raw) => split_list(&raw),
            None => server_defaults.cors_origins,
        };
        let server = ServerConfig {
            port: parse_or(&lookup, "TODO_CHAT_PORT", server_defaults.port)?,
            db_path: lookup("TODO_CHAT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(server_defaults.db_path),
            cors_origins,
            rate_limit_per_minute: parse_or(
                &lookup,
                "TODO_CHAT_RATE_LIMIT_PER_MIN",
                server_defaults.rate_limit_per_minute,
            )?,
            api_tokens: parse_tokens(&lookup("TODO_CHAT_API_TOKENS").unwrap_or_default())?,
        };

        Ok(Self {
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
            },
            agent,
            server,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parses `token=user_id,token2=user_id2`.
fn parse_tokens(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut tokens = HashMap::new();
    for pair in split_list(raw) {
        let (token, user) = pair
            .split_once('=')
            .map(|(t, u)| (t.trim(), u.trim()))
            .filter(|(t, u)| !t.is_empty() && !u.is_empty())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "TODO_CHAT_API_TOKENS".to_string(),
                message: format!("expected token=user_id, got '{pair}'"),
            })?;
        tokens.insert(token.to_string(), user.to_string());
    }
    Ok(tokens)
}
