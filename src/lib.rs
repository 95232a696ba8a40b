//! Todo Chat: task management with a conversational agent.

pub mod agent;
pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod server;
pub mod store;
pub mod tasks;
pub mod tools;
