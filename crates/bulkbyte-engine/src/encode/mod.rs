//! Row encoders: turn a [`Row`] into the exact bytes a sink expects.
//!
//! Encoders project the upstream row through a [`ResolvedMapping`] so the
//! output is in target column order. A caller encodes each row into a scratch
//! buffer and only hands the buffer to the sink once `encode_row` succeeded,
//! so a failed row never leaves a partial record behind.

pub mod cube;
pub mod text;

use bigdecimal::BigDecimal;
use bulkbyte_types::error::StepError;
use bulkbyte_types::mapping::ResolvedMapping;
use bulkbyte_types::row::{Row, RowValue};
use bulkbyte_types::row_meta::FieldDescriptor;
use bulkbyte_types::value_type::ValueType;

pub use cube::{CubeDecoder, CubeEncoder, CubeError, CubeReader, CubeWriter};
pub use text::{TextEncoder, TextFormat};

/// Per-row encoding failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("column '{column}' expects {expected} but row holds {actual}")]
    TypeMismatch {
        column: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("column '{column}' has no resolvable type")]
    UnknownType { column: String },

    #[error("column '{column}' reads value {index} but row has {actual} values")]
    MissingValue {
        column: String,
        index: usize,
        actual: usize,
    },
}

impl EncodeError {
    fn code(&self) -> &'static str {
        match self {
            Self::TypeMismatch { .. } => "ENCODE_TYPE_MISMATCH",
            Self::UnknownType { .. } => "ENCODE_UNKNOWN_TYPE",
            Self::MissingValue { .. } => "ENCODE_MISSING_VALUE",
        }
    }

    fn column(&self) -> &str {
        match self {
            Self::TypeMismatch { column, .. }
            | Self::UnknownType { column }
            | Self::MissingValue { column, .. } => column,
        }
    }
}

impl From<EncodeError> for StepError {
    fn from(err: EncodeError) -> Self {
        StepError::encoding(err.code(), err.to_string())
            .with_details(serde_json::json!({ "column": err.column() }))
    }
}

/// Serializes rows for one sink.
pub trait RowEncoder: Send + Sync {
    /// Bytes written once before the first row.
    fn write_header(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        let _ = buf;
        Ok(())
    }

    /// Append one encoded record to `buf`. On error `buf` may hold a partial
    /// record and must be discarded.
    fn encode_row(&self, row: &Row, buf: &mut Vec<u8>) -> Result<(), EncodeError>;
}

/// One output column bound to its upstream position.
#[derive(Debug, Clone)]
pub(crate) struct ColumnPlan {
    pub source: usize,
    pub field: FieldDescriptor,
}

pub(crate) fn column_plans(resolved: &ResolvedMapping) -> Vec<ColumnPlan> {
    resolved
        .source_indexes
        .iter()
        .zip(resolved.target.iter())
        .map(|(&source, field)| ColumnPlan {
            source,
            field: field.clone(),
        })
        .collect()
}

impl ColumnPlan {
    /// Fetch this column's value from `row`, checking it against the declared type.
    pub fn value<'r>(&self, row: &'r Row) -> Result<&'r RowValue, EncodeError> {
        let value = row.get(self.source).ok_or_else(|| EncodeError::MissingValue {
            column: self.field.name.clone(),
            index: self.source,
            actual: row.len(),
        })?;
        if let Some(actual) = value.value_type() {
            if self.field.value_type == ValueType::None {
                return Err(EncodeError::UnknownType {
                    column: self.field.name.clone(),
                });
            }
            if actual != self.field.value_type {
                return Err(EncodeError::TypeMismatch {
                    column: self.field.name.clone(),
                    expected: self.field.value_type,
                    actual,
                });
            }
        }
        Ok(value)
    }
}

/// Render a decimal without exponent notation.
pub(crate) fn plain_decimal(value: &BigDecimal) -> String {
    let (int, scale) = value.as_bigint_and_exponent();
    let text = int.to_string();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.as_str()),
    };

    let mut out = String::with_capacity(digits.len() + 4);
    if negative {
        out.push('-');
    }
    if scale <= 0 {
        out.push_str(digits);
        if digits != "0" {
            out.extend(std::iter::repeat('0').take(scale.unsigned_abs() as usize));
        }
        return out;
    }

    let scale = scale as usize;
    if digits.len() > scale {
        let (whole, frac) = digits.split_at(digits.len() - scale);
        out.push_str(whole);
        out.push('.');
        out.push_str(frac);
    } else {
        out.push_str("0.");
        out.extend(std::iter::repeat('0').take(scale - digits.len()));
        out.push_str(digits);
    }
    out
}
