//! Engine-level error model.

use bulkbyte_types::error::{ErrorCategory, StepError};

/// Failure of a step operation as seen by the engine.
///
/// `Step` wraps a typed [`StepError`] with its category and scope.
///
/// `Infrastructure` wraps opaque host-side errors (file reads, YAML parsing,
/// task joins) that have no row or step semantics of their own.
#[derive(Debug)]
pub enum StepFailure {
    /// Typed step error.
    Step(StepError),
    /// Infrastructure error (I/O, parsing, join failures, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Step(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for StepFailure {}

impl From<anyhow::Error> for StepFailure {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<StepError> for StepFailure {
    fn from(e: StepError) -> Self {
        Self::Step(e)
    }
}

impl StepFailure {
    /// Returns the typed step error if this is a `Step` variant.
    pub fn as_step_error(&self) -> Option<&StepError> {
        match self {
            Self::Step(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }

    /// True for errors raised before execution begins.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Step(e) if e.category == ErrorCategory::Config)
    }

    /// Collapse into a [`StepError`], classifying opaque errors as internal.
    pub fn into_step_error(self) -> StepError {
        match self {
            Self::Step(e) => e,
            Self::Infrastructure(e) => StepError::internal("INFRASTRUCTURE", format!("{e:#}")),
        }
    }
}
