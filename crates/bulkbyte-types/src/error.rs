//! Structured error model for step execution.
//!
//! [`StepError`] carries a classification, a blast radius, a stable code, and
//! optional diagnostic details. Construct via category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::row_meta::RowMetaError;

/// Broad classification of a step error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad or missing configuration; execution never begins.
    Config,
    /// Field negotiation or DDL produced an unusable schema.
    Schema,
    /// Pipe, file, or connection could not be acquired.
    Resource,
    /// A row value could not be encoded.
    Encoding,
    /// The external consumer failed or exited non-zero.
    SinkProcess,
    /// A bounded wait expired.
    Timeout,
    /// Execution was stopped on request.
    Cancelled,
    /// Internal invariant violation.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Schema => "schema",
            Self::Resource => "resource",
            Self::Encoding => "encoding",
            Self::SinkProcess => "sink_process",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Blast radius of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// Fatal to the whole step.
    Step,
    /// Affects a single row; policy decides whether it is fatal.
    Row,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step => f.write_str("step"),
            Self::Row => f.write_str("row"),
        }
    }
}

/// Structured error from a step operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct StepError {
    pub category: ErrorCategory,
    pub scope: ErrorScope,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StepError {
    fn new(
        category: ErrorCategory,
        scope: ErrorScope,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            scope,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Configuration error, raised before execution starts.
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, ErrorScope::Step, code, message)
    }

    /// Schema error (for example an `UNKNOWN` DDL fragment).
    #[must_use]
    pub fn schema(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Schema, ErrorScope::Step, code, message)
    }

    /// Resource acquisition error.
    #[must_use]
    pub fn resource(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Resource, ErrorScope::Step, code, message)
    }

    /// Per-row encoding error.
    #[must_use]
    pub fn encoding(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Encoding, ErrorScope::Row, code, message)
    }

    /// External consumer failure.
    #[must_use]
    pub fn sink_process(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::SinkProcess, ErrorScope::Step, code, message)
    }

    /// Bounded wait expired.
    #[must_use]
    pub fn timeout(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, ErrorScope::Step, code, message)
    }

    /// Stop requested.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Cancelled, ErrorScope::Step, "CANCELLED", message)
    }

    /// Internal invariant violation.
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, ErrorScope::Step, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the default error scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn is_row_scoped(&self) -> bool {
        self.scope == ErrorScope::Row
    }
}

impl From<RowMetaError> for StepError {
    fn from(err: RowMetaError) -> Self {
        let code = match err {
            RowMetaError::DuplicateField { .. } => "DUPLICATE_FIELD",
            RowMetaError::NotFound { .. } => "FIELD_NOT_FOUND",
            RowMetaError::ArityMismatch { .. } => "ROW_ARITY",
            RowMetaError::TypeMismatch { .. } => "ROW_TYPE",
        };
        match err {
            RowMetaError::ArityMismatch { .. } | RowMetaError::TypeMismatch { .. } => {
                Self::encoding(code, err.to_string())
            }
            _ => Self::config(code, err.to_string()),
        }
    }
}
