//! Model gateway for the research agent.
//!
//! This crate provides the chat client used by the agent loop:
//! - OpenAI-compatible `/chat/completions` transport
//! - Native tool calls surfaced on the response
//! - Retry with exponential backoff on rate limits and server errors

pub mod openai;

pub use openai::OpenAiCompatClient;
