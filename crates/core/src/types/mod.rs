//! Core type definitions for the research agent.
//!
//! Broken down into submodules:
//! - `tool`: tool definitions, invocation requests and results
//! - `conversation`: turns of the append-only conversation log

pub mod conversation;
pub mod tool;

pub use conversation::*;
pub use tool::*;
