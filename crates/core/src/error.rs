//! Error types for the research agent.

use thiserror::Error;

/// Result type alias using the research agent's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the research agent.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Controller Errors
    // =========================================================================
    #[error("Controller error: {0}")]
    Controller(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Conversation store error: {0}")]
    Store(String),

    // =========================================================================
    // Skills Errors
    // =========================================================================
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Sandbox worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Frame protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Model Gateway Errors
    // =========================================================================
    #[error("Model provider error: {0}")]
    ModelProvider(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a controller error.
    pub fn controller(msg: impl Into<String>) -> Self {
        Self::Controller(msg.into())
    }

    /// Create a conversation store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a tool not found error.
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    /// Create a tool execution error.
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create a sandbox error.
    pub fn sandbox(msg: impl Into<String>) -> Self {
        Self::Sandbox(msg.into())
    }

    /// Create a frame protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a model provider error.
    pub fn model_provider(msg: impl Into<String>) -> Self {
        Self::ModelProvider(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
