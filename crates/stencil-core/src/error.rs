//
// error.rs
//
// Typed failure results for the analysis engine.
//

use thiserror::Error;
use tower_lsp::lsp_types::Url;

use crate::timeout::OperationKind;

/// Engine-level failures surfaced to the boundary layer.
///
/// Cancellation and timeouts are distinct variants: a timeout means the
/// operation exceeded its deadline, a cancellation means a newer request
/// superseded it (or its connection went away). Callers must never treat
/// one as the other.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An operation exceeded its configured deadline.
    #[error("{operation} operation timed out")]
    Timeout { operation: OperationKind },

    /// The operation was superseded or its session ended. Expected, silent.
    #[error("operation cancelled")]
    Cancelled,

    /// The document is owned by a different connection.
    #[error("access denied: document {uri} is owned by another connection")]
    AccessDenied { uri: Url },

    /// The connection's token bucket is empty.
    #[error("rate limit exceeded for connection '{connection}'")]
    RateLimited { connection: String },

    /// Input rejected before any processing (resource exhaustion policy).
    #[error("document too large: {size} bytes exceeds limit of {limit}")]
    DocumentTooLarge { size: usize, limit: usize },

    /// The API-surface specification failed validation. Fatal at load.
    #[error("invalid API specification: {}", .errors.join("; "))]
    InvalidSpec { errors: Vec<String> },

    /// The grammar parser returned no tree at all.
    #[error("parser produced no syntax tree")]
    ParseFailed,
}

impl EngineError {
    /// True for the silent, expected outcomes that must not be logged as
    /// errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_operation() {
        let err = EngineError::Timeout {
            operation: OperationKind::Parsing,
        };
        assert_eq!(err.to_string(), "parsing operation timed out");
    }

    #[test]
    fn test_invalid_spec_joins_errors() {
        let err = EngineError::InvalidSpec {
            errors: vec!["first".to_string(), "second".to_string()],
        };
        assert!(err.to_string().contains("first; second"));
    }

    #[test]
    fn test_cancellation_is_not_conflated_with_timeout() {
        assert!(EngineError::Cancelled.is_cancellation());
        assert!(!EngineError::Timeout {
            operation: OperationKind::Validation
        }
        .is_cancellation());
    }
}
