//! Conversation: message log, per-user rate limiting, and chat routes.

pub mod log;
pub mod model;
pub mod rate_limit;
pub mod routes;

pub use log::MessageLog;
pub use model::{ConversationMessage, Sender};
pub use rate_limit::RateLimiter;
