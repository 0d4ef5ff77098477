//! Shared bulkbyte row metadata, value, mapping, result, and error model types.
//!
//! This crate performs no I/O and is safe to depend on from every layer.

pub mod error;
pub mod mapping;
pub mod result;
pub mod row;
pub mod row_meta;
pub mod value_type;

pub use error::{ErrorCategory, ErrorScope, StepError};
pub use mapping::{FieldMapping, FieldMappingEntry, FormatHint, ResolvedMapping};
pub use result::{ResultFile, ResultFileKind, SinkReport, StepResult};
pub use row::{Row, RowValue};
pub use row_meta::{folded_name, names_match, FieldDescriptor, RowMetaError, RowMetadata};
pub use value_type::ValueType;
