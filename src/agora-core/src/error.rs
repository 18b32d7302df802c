//! Error types for the debate system and its transports.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebateError {
    #[error("Debate setup failed: {reason}")]
    SetupFailure { reason: String, raw: String },

    #[error("Remote call failed for {role}: {message}")]
    RemoteCallFailure { role: String, message: String },

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("Call to {role} exceeded its {deadline:?} deadline")]
    Timeout { role: String, deadline: Duration },

    #[error("Debate cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// A model reply that could not be turned into the expected record.
///
/// Carries the raw reply so the caller can log exactly what the model said.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Could not extract {expected} from model reply: {reason}")]
pub struct ExtractionFailed {
    pub expected: &'static str,
    pub reason: String,
    pub raw: String,
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Access denied: {0}")]
    PermissionDenied(String),

    #[error("Tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },

    #[error("Agent gave no final answer after {0} iterations")]
    IterationLimit(usize),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Transcript sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection to the server was aborted")]
    ConnectionAborted,

    #[error("Server is not started")]
    NotStarted,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
