//! Skills for the research agent.
//!
//! This crate provides:
//! - The tool registry
//! - Built-in tools (echo, current time)
//! - Remote tools reached over HTTP, each with its own retry and rate limit

pub mod builtin;
pub mod registry;
pub mod remote;

pub use builtin::{CurrentTimeTool, EchoTool};
pub use registry::DefaultToolRegistry;
pub use remote::{register_remote_tools, RemoteTool};
