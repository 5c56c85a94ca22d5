use thiserror::Error;

use crate::engine::events::SessionId;

/// Errors returned synchronously at the session boundary.
///
/// Operation failures never show up here; they end the session as `Failed`.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("malformed output path: {reason}")]
    MalformedPath { reason: String },

    #[error("session '{0}' not found")]
    NotFound(SessionId),

    #[error("engine is shutting down")]
    ShuttingDown,
}
