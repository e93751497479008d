//! Error types for the OpenTrade transaction engine.
//!
//! Every error Display string starts with one of the stable `E_*` taxonomy
//! codes so responses and logs can be grepped and matched without parsing
//! free-form text. The taxonomy is part of the public API contract:
//! `E_INVALID_ARGUMENT`, `E_AUTH_REQUIRED`, `E_FORBIDDEN`, `E_NOT_FOUND`,
//! `E_CONFLICT`, `E_QUOTA_EXCEEDED`, `E_EXPIRED`, `E_REVOKED`,
//! `E_UNAVAILABLE`, `E_TIMEOUT`, `E_INTERNAL`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidArgument,
    AuthRequired,
    Forbidden,
    NotFound,
    Conflict,
    QuotaExceeded,
    Expired,
    Revoked,
    Unavailable,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// The wire code for this kind.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidArgument => "E_INVALID_ARGUMENT",
            Self::AuthRequired => "E_AUTH_REQUIRED",
            Self::Forbidden => "E_FORBIDDEN",
            Self::NotFound => "E_NOT_FOUND",
            Self::Conflict => "E_CONFLICT",
            Self::QuotaExceeded => "E_QUOTA_EXCEEDED",
            Self::Expired => "E_EXPIRED",
            Self::Revoked => "E_REVOKED",
            Self::Unavailable => "E_UNAVAILABLE",
            Self::Timeout => "E_TIMEOUT",
            Self::Internal => "E_INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Central error enum for all OpenTrade operations.
#[derive(Debug, Error)]
pub enum OpentradeError {
    // =================================================================
    // Caller errors
    // =================================================================
    /// Input failed validation (missing fields, bad values, etc.).
    #[error("E_INVALID_ARGUMENT: {reason}")]
    InvalidArgument { reason: String },

    /// The operation requires an authenticated actor.
    #[error("E_AUTH_REQUIRED: {reason}")]
    AuthRequired { reason: String },

    /// The actor is known but not allowed to perform the operation.
    #[error("E_FORBIDDEN: {reason}")]
    Forbidden { reason: String },

    /// A referenced entity does not exist.
    #[error("E_NOT_FOUND: {entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// State conflict: duplicates, unmet preconditions.
    #[error("E_CONFLICT: {reason}")]
    Conflict { reason: String },

    /// A status change outside the entity's transition graph.
    #[error("E_CONFLICT: invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// A configured limit was exceeded.
    #[error("E_QUOTA_EXCEEDED: {reason}")]
    QuotaExceeded { reason: String },

    /// A deadline or expiry has passed.
    #[error("E_EXPIRED: {reason}")]
    Expired { reason: String },

    /// The referenced grant/lease/consent has been revoked.
    #[error("E_REVOKED: {reason}")]
    Revoked { reason: String },

    // =================================================================
    // Dependency errors
    // =================================================================
    /// An external dependency is down or not configured.
    #[error("E_UNAVAILABLE: {reason}")]
    Unavailable { reason: String },

    /// An external call or lock acquisition exceeded its deadline.
    #[error("E_TIMEOUT: {reason}")]
    Timeout { reason: String },

    // =================================================================
    // Internal errors
    // =================================================================
    /// Unrecoverable internal error.
    #[error("E_INTERNAL: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("E_INTERNAL: serialization error: {0}")]
    Serialization(String),

    /// Storage backend error.
    #[error("E_INTERNAL: storage error: {0}")]
    Storage(String),

    /// I/O error (disk, network).
    #[error("E_INTERNAL: I/O error: {0}")]
    Io(String),
}

impl OpentradeError {
    /// Classify this error into the stable taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::AuthRequired { .. } => ErrorKind::AuthRequired,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } | Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::Revoked { .. } => ErrorKind::Revoked,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Internal(_) | Self::Serialization(_) | Self::Storage(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Convenience constructor for `InvalidArgument`.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for `Conflict`.
    #[must_use]
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for `NotFound`.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, OpentradeError>;

impl From<std::io::Error> for OpentradeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OpentradeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_contains_code() {
        let err = OpentradeError::not_found("offer", "abc");
        let msg = format!("{err}");
        assert!(msg.starts_with("E_NOT_FOUND"), "Got: {msg}");
        assert!(msg.contains("abc"));
    }

    #[test]
    fn transition_error_names_pair() {
        let err = OpentradeError::InvalidTransition {
            entity: "order",
            from: "SETTLEMENT_COMPLETED".into(),
            to: "CREATED".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("SETTLEMENT_COMPLETED -> CREATED"));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn all_errors_have_taxonomy_prefix() {
        let errors: Vec<OpentradeError> = vec![
            OpentradeError::invalid("bad"),
            OpentradeError::AuthRequired {
                reason: "actor required".into(),
            },
            OpentradeError::Forbidden {
                reason: "nope".into(),
            },
            OpentradeError::conflict("dup"),
            OpentradeError::QuotaExceeded {
                reason: "limit".into(),
            },
            OpentradeError::Expired {
                reason: "late".into(),
            },
            OpentradeError::Revoked {
                reason: "gone".into(),
            },
            OpentradeError::Unavailable {
                reason: "down".into(),
            },
            OpentradeError::Timeout {
                reason: "slow".into(),
            },
            OpentradeError::Internal("boom".into()),
            OpentradeError::Storage("disk".into()),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(msg.starts_with("E_"), "Error missing taxonomy prefix: {msg}");
            assert!(msg.starts_with(err.kind().code()), "Prefix/kind mismatch: {msg}");
        }
    }

    #[test]
    fn kind_serde_wire_shape() {
        let json = serde_json::to_string(&ErrorKind::InvalidArgument).unwrap();
        assert_eq!(json, "\"INVALID_ARGUMENT\"");
    }
}
