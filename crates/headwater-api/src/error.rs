//! Error types shared by the server and the client.
//!
//! Domain errors ([`ShapeError`], [`GenerationError`], [`StoreError`]) are
//! `thiserror` enums. [`ErrorBody`] is the JSON error envelope every
//! endpoint returns:
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "template required when using input variables" } }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A batch description that does not unambiguously name its items.
///
/// Raised before any generation call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("ambiguous or empty batch: exactly one of prompt list or variable list required")]
    AmbiguousOrEmpty,

    #[error("template required when using input variables")]
    MissingTemplate,

    #[error("template rendering failed for item {index}: {source}")]
    Template {
        index: usize,
        #[source]
        source: TemplateError,
    },
}

/// The template could not be compiled or a variable map did not satisfy it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TemplateError {
    pub message: String,
}

impl TemplateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure of a single generation call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// The backend could not be reached at all (connection refused, DNS, ...).
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    #[error("generation provider is disabled")]
    Disabled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GenerationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GenerationError::Upstream { .. } => FailureKind::Upstream,
            GenerationError::Unavailable(_) => FailureKind::Unavailable,
            GenerationError::Timeout(_) => FailureKind::Timeout,
            GenerationError::InvalidOutput(_) => FailureKind::InvalidOutput,
            GenerationError::Disabled => FailureKind::Disabled,
            GenerationError::Internal(_) => FailureKind::Internal,
        }
    }
}

/// Machine-readable category of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Upstream,
    Unavailable,
    Timeout,
    InvalidOutput,
    Disabled,
    Internal,
}

/// Wire form of a captured per-item failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&GenerationError> for ItemFailure {
    fn from(err: &GenerationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Errors raised by a [`crate::store::CollectionStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    AlreadyExists(String),

    #[error("embedding dimension mismatch in collection {collection}: expected {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// JSON error envelope returned by every endpoint on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Machine-readable code plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_error_messages_are_stable() {
        assert_eq!(
            ShapeError::AmbiguousOrEmpty.to_string(),
            "ambiguous or empty batch: exactly one of prompt list or variable list required"
        );
        assert_eq!(
            ShapeError::MissingTemplate.to_string(),
            "template required when using input variables"
        );
    }

    #[test]
    fn failure_kind_follows_error() {
        let err = GenerationError::Timeout(Duration::from_secs(3));
        let failure = ItemFailure::from(&err);
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.message.contains("3s"));
    }
}
