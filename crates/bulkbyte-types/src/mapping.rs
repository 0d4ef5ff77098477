//! Stream-field to sink-column mapping with per-column format hints.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::row_meta::{RowMetaError, RowMetadata};

/// Per-column formatting rule applied by the text encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FormatHint {
    /// Value is written using its type's default representation.
    #[default]
    Ok,
    /// Dates as `yyyy-MM-dd`.
    Date,
    /// Dates as `yyyy-MM-dd HH:mm:ss`.
    Timestamp,
    /// Plain decimal, `.` separator, no grouping.
    Number,
    /// Escape embedded escape and enclosure characters.
    StringEscape,
}

impl FormatHint {
    /// Configuration code for this hint.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Number => "NUMBER",
            Self::StringEscape => "STRING_ESC",
        }
    }

    /// Parse a code case-insensitively. Unknown codes fall back to [`FormatHint::Ok`].
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "DATE" => Self::Date,
            "TIMESTAMP" => Self::Timestamp,
            "NUMBER" => Self::Number,
            "STRING_ESC" | "STRING_ESCAPE" => Self::StringEscape,
            _ => Self::Ok,
        }
    }
}

impl fmt::Display for FormatHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl From<String> for FormatHint {
    fn from(code: String) -> Self {
        Self::from_code(&code)
    }
}

impl From<FormatHint> for String {
    fn from(hint: FormatHint) -> Self {
        hint.code().to_string()
    }
}

/// One `(stream field, sink column, hint)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMappingEntry {
    /// Upstream field name.
    pub stream: String,
    /// Target column name.
    pub column: String,
    #[serde(default)]
    pub format: FormatHint,
}

/// Ordered mapping from upstream fields to sink columns, in sink column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping {
    entries: Vec<FieldMappingEntry>,
}

/// A mapping bound to a concrete upstream [`RowMetadata`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMapping {
    /// Upstream index feeding each target column.
    pub source_indexes: Vec<usize>,
    /// Hint for each target column.
    pub formats: Vec<FormatHint>,
    /// Output metadata: cloned upstream descriptors renamed to column names.
    pub target: RowMetadata,
}

impl FieldMapping {
    pub fn new(entries: Vec<FieldMappingEntry>) -> Self {
        Self { entries }
    }

    /// Builder-style append.
    #[must_use]
    pub fn with(
        mut self,
        stream: impl Into<String>,
        column: impl Into<String>,
        format: FormatHint,
    ) -> Self {
        self.entries.push(FieldMappingEntry {
            stream: stream.into(),
            column: column.into(),
            format,
        });
        self
    }

    /// Identity mapping over every field of `meta`.
    pub fn identity(meta: &RowMetadata) -> Self {
        Self::new(
            meta.iter()
                .map(|f| FieldMappingEntry {
                    stream: f.name.clone(),
                    column: f.name.clone(),
                    format: FormatHint::Ok,
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[FieldMappingEntry] {
        &self.entries
    }

    pub fn columns(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.column.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stream field names absent from `input`, in mapping order.
    pub fn missing_fields(&self, input: &RowMetadata) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| input.index_of(&e.stream).is_none())
            .map(|e| e.stream.clone())
            .collect()
    }

    /// Bind this mapping to `input`.
    ///
    /// # Errors
    ///
    /// Returns [`RowMetaError::NotFound`] for the first unknown stream field and
    /// [`RowMetaError::DuplicateField`] when two entries target the same column.
    pub fn resolve(&self, input: &RowMetadata) -> Result<ResolvedMapping, RowMetaError> {
        let mut source_indexes = Vec::with_capacity(self.entries.len());
        let mut formats = Vec::with_capacity(self.entries.len());
        let mut target = RowMetadata::new();
        for entry in &self.entries {
            let index = input
                .index_of(&entry.stream)
                .ok_or_else(|| RowMetaError::NotFound {
                    name: entry.stream.clone(),
                })?;
            let source = &input.fields()[index];
            target.add_field(source.renamed(entry.column.clone()))?;
            source_indexes.push(index);
            formats.push(entry.format);
        }
        Ok(ResolvedMapping {
            source_indexes,
            formats,
            target,
        })
    }
}
