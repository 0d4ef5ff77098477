//! Runtime row values.
//!
//! A [`Row`] is positionally aligned with a [`RowMetadata`]; use
//! [`RowMetadata::check_row`] to verify arity and per-field types before
//! handing a row to an encoder.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

use crate::row_meta::{RowMetaError, RowMetadata};
use crate::value_type::ValueType;

/// A single field value. `Null` is valid for any field type.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    BigNumber(BigDecimal),
    Date(NaiveDateTime),
    Boolean(bool),
    Binary(Vec<u8>),
}

impl RowValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Type carried by a non-null value.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::String(_) => Some(ValueType::String),
            Self::Integer(_) => Some(ValueType::Integer),
            Self::Number(_) => Some(ValueType::Number),
            Self::BigNumber(_) => Some(ValueType::BigNumber),
            Self::Date(_) => Some(ValueType::Date),
            Self::Boolean(_) => Some(ValueType::Boolean),
            Self::Binary(_) => Some(ValueType::Binary),
        }
    }
}

impl From<&str> for RowValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for RowValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for RowValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for RowValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for RowValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<NaiveDateTime> for RowValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::Date(v)
    }
}

impl From<BigDecimal> for RowValue {
    fn from(v: BigDecimal) -> Self {
        Self::BigNumber(v)
    }
}

impl<T: Into<RowValue>> From<Option<T>> for RowValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One record. Owned by exactly one step at a time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<RowValue>,
}

impl Row {
    pub fn new(values: Vec<RowValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[RowValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&RowValue> {
        self.values.get(index)
    }

    pub fn push(&mut self, value: impl Into<RowValue>) {
        self.values.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<RowValue> {
        self.values
    }
}

impl From<Vec<RowValue>> for Row {
    fn from(values: Vec<RowValue>) -> Self {
        Self::new(values)
    }
}

impl RowMetadata {
    /// Verify that `row` conforms positionally and by type.
    ///
    /// # Errors
    ///
    /// Returns [`RowMetaError::ArityMismatch`] or [`RowMetaError::TypeMismatch`].
    pub fn check_row(&self, row: &Row) -> Result<(), RowMetaError> {
        if row.len() != self.len() {
            return Err(RowMetaError::ArityMismatch {
                expected: self.len(),
                actual: row.len(),
            });
        }
        for (field, value) in self.iter().zip(row.values()) {
            if let Some(actual) = value.value_type() {
                if actual != field.value_type {
                    return Err(RowMetaError::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.value_type,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }
}
