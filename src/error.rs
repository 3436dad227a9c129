use std::fmt;

use crate::WarningChain;

/// Rejection reported by the server for a single statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerError {
    /// Error message text from the server.
    pub message: String,
    /// Optional engine-specific error code.
    pub code: Option<String>,
}

impl ServerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum StmtError {
    /// Malformed statement text (unterminated quote or comment).
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },
    /// Raw server rejection reported by a protocol layer.
    #[error("server error: {0}")]
    Server(ServerError),
    /// The server rejected the statement during parse/describe.
    #[error("prepare failed: {error}")]
    Prepare {
        error: ServerError,
        /// Warnings collected before the failure.
        warnings: WarningChain,
    },
    /// The server failed while running the statement.
    #[error("execute failed: {error}")]
    Execute {
        error: ServerError,
        /// Warnings collected before the failure.
        warnings: WarningChain,
    },
    /// Generated keys were requested for a statement that cannot return rows.
    #[error("generated keys can only be requested for INSERT, UPDATE, DELETE or MERGE statements")]
    InvalidCommandForGeneratedKeys,
    /// Feature combination that is not implemented.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// A row set was expected but the statement produced a count.
    #[error("statement did not produce a result set")]
    NoResultSetAvailable,
    /// A count was expected but the statement produced a row set.
    #[error("statement did not produce an update count")]
    NoResultCountAvailable,
    /// Execution was cancelled by the caller.
    #[error("statement execution was cancelled")]
    Cancelled,
    /// Execution exceeded the configured query timeout.
    #[error("statement execution timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// Lifecycle misuse, e.g. preparing a command that is still open.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The statement was closed by the caller.
    #[error("statement is closed")]
    StatementClosed,
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// Response decoding or protocol-shape validation error.
    #[error("decode error: {0}")]
    Decode(String),
}

impl StmtError {
    /// Warnings attached to a prepare or execute failure.
    pub fn warnings(&self) -> Option<&WarningChain> {
        match self {
            Self::Prepare { warnings, .. } | Self::Execute { warnings, .. } => Some(warnings),
            _ => None,
        }
    }

    /// Server error details, if the server rejected the statement.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Server(error) | Self::Prepare { error, .. } | Self::Execute { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }
}
