//! The error taxonomy shared across the engine.

use thiserror::Error;

/// Errors raised anywhere in the graph inventory engine.
///
/// Each variant corresponds to one row of the error taxonomy: parse and
/// validation errors are never retried; [`Error::Conflict`] and
/// [`Error::Timeout`] on in-flight worker tasks are retried up to a
/// configured `max_attempts`; workflow step failures follow the step's
/// failure policy.
#[derive(Debug, Error)]
pub enum Error {
    /// The query DSL failed to parse.
    #[error("parse error at position {position}: {message}")]
    ParseError {
        /// Byte offset into the input where parsing failed.
        position: usize,
        /// Human-readable description of what was expected.
        message: String,
    },

    /// The parsed query was rejected at the AST level (bad edge_type,
    /// incompatible combine, etc).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A node payload was rejected by the model.
    #[error("model violation: {0}")]
    ModelViolation(String),

    /// An incoming subgraph had a dangling edge endpoint or more/fewer
    /// than one root.
    #[error("incomplete graph: {0}")]
    IncompleteGraph(String),

    /// An id, config entry, or subscription could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A revision/sequence mismatch on a persisted entity; caller should
    /// retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A deadline elapsed (worker task, workflow step).
    #[error("timeout: {0}")]
    Timeout(String),

    /// A parent operation was terminated; this error is swallowed
    /// upstream rather than surfaced to an end user.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A programming error or storage failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error class is ever retried automatically.
    ///
    /// Parse and validation errors are never retried. `Conflict` and
    /// `Timeout` are retried up to the caller's `max_attempts`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ParseError {
            position: err.column(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_and_timeout_are_retryable() {
        assert!(Error::Conflict("x".into()).is_retryable());
        assert!(Error::Timeout("x".into()).is_retryable());
    }

    #[test]
    fn parse_errors_are_not_retryable() {
        assert!(!Error::ParseError {
            position: 0,
            message: "x".into()
        }
        .is_retryable());
        assert!(!Error::ModelViolation("x".into()).is_retryable());
    }
}
