//! Error types for threadrun.

use thiserror::Error;

/// Primary error type for all threadrun operations.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Rendered JSON is invalid: {source}\n{rendered}")]
    RenderedJson {
        #[source]
        source: serde_json::Error,
        rendered: String,
    },

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("State store error: {0}")]
    State(String),
}

/// Broad error category, one per failure class a run can hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing assistant, missing thread on continuation, missing tool program.
    Configuration,
    /// Non-success status, broken connection, stream-level failure.
    Transport,
    /// A tool process could not start, timed out, or could not be reaped.
    ToolExecution,
    /// Template compilation or rendered-JSON decoding failed.
    Template,
    /// An input descriptor could not be read or parsed.
    Input,
    /// The persisted state could not be read or written.
    State,
}

impl RunError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Api { .. } | Self::Network(_) | Self::Stream(_) | Self::Timeout(_) => {
                ErrorCategory::Transport
            }
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Template(_) | Self::RenderedJson { .. } | Self::Serialization(_) => {
                ErrorCategory::Template
            }
            Self::Input(_) => ErrorCategory::Input,
            Self::State(_) | Self::Io(_) => ErrorCategory::State,
        }
    }

    /// Whether this error aborts the run.
    ///
    /// Tool execution failures are folded into the tool output and sent back
    /// to the assistant instead.
    pub fn is_fatal(&self) -> bool {
        self.category() != ErrorCategory::ToolExecution
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RunError>;
