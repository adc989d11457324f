//! Controller for the research agent.
//!
//! This crate provides the agent loop: tool-call normalization, the concurrent
//! tool-call dispatcher, the conversation log with its stop policy, and the
//! per-run binding session shared by sequential code executions.

pub mod builder;
pub mod conversation;
pub mod dispatcher;
pub mod parser;
pub mod persistence;
pub mod react;
pub mod session;

pub use builder::ResearchAgentBuilder;
pub use conversation::{ConversationState, StopDecision, StopPolicy, StopReason, TerminateHandle};
pub use dispatcher::{DispatcherConfig, ToolCallDispatcher};
pub use parser::{extract_final_answer, normalize_invocations, ActionParser, ReActAction, FINAL_ANSWER_MARKER};
pub use persistence::InMemoryConversationStore;
pub use react::{AgentRun, ResearchAgent};
pub use session::{BindingSession, IssuedSnapshot, RESET_SESSION_TOOL};
pub use research_agent_core::traits::ConversationStore;
