//! Error taxonomy for worksheet execution.
//!
//! Preparation errors stop a script before anything runs, execution errors fail
//! the call that raised them, and statement errors are only surfaced directly
//! for single-query execution (scripts record them in-band).

use thiserror::Error;

use crate::db::query::SqlScriptError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// One or more substitution prompts have no value.
    #[error("unresolved substitution variables: {}", names.join(", "))]
    UnresolvedSubstitutions { names: Vec<String> },

    #[error("statement {statement_id} is malformed: {reason}")]
    MalformedStatement { statement_id: usize, reason: String },

    #[error("expected exactly one statement, found {count}")]
    NotASingleStatement { count: usize },

    #[error("session is disconnected")]
    SessionDisconnected,

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unknown connection `{0}`")]
    UnknownConnection(String),

    #[error(transparent)]
    Statement(#[from] SqlScriptError),

    #[error("cursor expired: {0}")]
    CursorExpired(String),

    #[error("concurrent access: {0}")]
    ConcurrentAccess(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn is_preparation(&self) -> bool {
        matches!(
            self,
            Error::UnresolvedSubstitutions { .. }
                | Error::MalformedStatement { .. }
                | Error::NotASingleStatement { .. }
        )
    }

    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            Error::SessionDisconnected
                | Error::InvalidOptions(_)
                | Error::Connect(_)
                | Error::UnknownConnection(_)
                | Error::Internal(_)
        )
    }

    pub(crate) fn invalid_page_size(page_size: usize) -> Self {
        Error::InvalidOptions(format!(
            "pageSize must be at least 1 (got {page_size})"
        ))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("database task failed: {err}"))
    }
}
