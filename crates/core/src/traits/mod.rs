//! Core traits for the research agent.
//!
//! Traits are organized by layer:
//! - `skills`: Tool and ToolRegistry
//! - `llm`: LlmClient and the chat wire types
//! - `store`: ConversationStore

pub mod llm;
pub mod skills;
pub mod store;

pub use llm::*;
pub use skills::*;
pub use store::*;
