//! Semantic value types carried by row fields.
//!
//! Every [`crate::row_meta::FieldDescriptor`] names one of these types and
//! every non-null [`crate::row::RowValue`] must agree with it. The numeric
//! tag returned by [`ValueType::tag`] is part of the cube wire format and
//! must never be renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical type of a row field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Type could not be resolved during field negotiation.
    None,
    String,
    Integer,
    Number,
    BigNumber,
    Date,
    Boolean,
    Binary,
}

/// A type name that does not correspond to any [`ValueType`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value type '{0}'")]
pub struct UnknownValueType(pub String);

impl ValueType {
    /// Returns the canonical string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::String => "String",
            Self::Integer => "Integer",
            Self::Number => "Number",
            Self::BigNumber => "BigNumber",
            Self::Date => "Date",
            Self::Boolean => "Boolean",
            Self::Binary => "Binary",
        }
    }

    /// Stable one-byte tag used by the cube format. `0` is reserved for null.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::None => 0xFF,
            Self::String => 1,
            Self::Integer => 2,
            Self::Number => 3,
            Self::BigNumber => 4,
            Self::Date => 5,
            Self::Boolean => 6,
            Self::Binary => 7,
        }
    }

    /// Inverse of [`ValueType::tag`].
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0xFF => Some(Self::None),
            1 => Some(Self::String),
            2 => Some(Self::Integer),
            3 => Some(Self::Number),
            4 => Some(Self::BigNumber),
            5 => Some(Self::Date),
            6 => Some(Self::Boolean),
            7 => Some(Self::Binary),
            _ => None,
        }
    }

    /// Integer, floating, and arbitrary-precision numbers.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Number | Self::BigNumber)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = UnknownValueType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "number" => Ok(Self::Number),
            "bignumber" | "big_number" => Ok(Self::BigNumber),
            "date" => Ok(Self::Date),
            "boolean" => Ok(Self::Boolean),
            "binary" => Ok(Self::Binary),
            _ => Err(UnknownValueType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ValueType; 8] = [
        ValueType::None,
        ValueType::String,
        ValueType::Integer,
        ValueType::Number,
        ValueType::BigNumber,
        ValueType::Date,
        ValueType::Boolean,
        ValueType::Binary,
    ];

    #[test]
    fn tags_are_unique_and_invertible() {
        for vt in ALL {
            assert_ne!(vt.tag(), 0, "tag 0 is reserved for null");
            assert_eq!(ValueType::from_tag(vt.tag()), Some(vt));
        }
        assert_eq!(ValueType::from_tag(0), None);
        assert_eq!(ValueType::from_tag(42), None);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("STRING".parse::<ValueType>().unwrap(), ValueType::String);
        assert_eq!("BigNumber".parse::<ValueType>().unwrap(), ValueType::BigNumber);
        assert_eq!("big_number".parse::<ValueType>().unwrap(), ValueType::BigNumber);
        assert!("decimal".parse::<ValueType>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ValueType::BigNumber).unwrap();
        assert_eq!(json, "\"big_number\"");
        let back: ValueType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ValueType::BigNumber);
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(ValueType::Integer.to_string(), "Integer");
        assert!(ValueType::Number.is_numeric());
        assert!(!ValueType::Date.is_numeric());
    }
}
