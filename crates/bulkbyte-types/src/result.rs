//! Step execution results returned to the surrounding orchestrator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// Kind tag of a file reference produced by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFileKind {
    #[default]
    General,
    Log,
    Error,
    Warning,
}

/// A file the step created and hands to downstream job entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFile {
    pub kind: ResultFileKind,
    pub path: PathBuf,
    /// Step that produced the file.
    pub origin: String,
}

/// What the external bulk-load consumer reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReport {
    pub exit_code: i32,
    pub records_written: u64,
    pub bytes_written: u64,
    /// Tail of the consumer's standard output.
    #[serde(default)]
    pub stdout: String,
    /// Tail of the consumer's standard error.
    #[serde(default)]
    pub stderr: String,
}

/// Aggregate outcome of one step execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub succeeded: bool,
    pub rows_read: u64,
    pub rows_written: u64,
    /// Rows rejected under the skip policy plus fatal failures.
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ResultFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<SinkReport>,
    /// First fatal error, if the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub cancelled: bool,
    pub duration_secs: f64,
}

impl StepResult {
    /// Successful result with no rows processed.
    pub fn empty_success() -> Self {
        Self {
            succeeded: true,
            ..Self::default()
        }
    }
}
