//! Row metadata: the ordered, name-unique field contract negotiated between steps.
//!
//! A [`RowMetadata`] is built once per step during field negotiation and is
//! read-only afterwards. Field names are unique case-insensitively; every
//! mutating operation either fully succeeds or leaves the metadata untouched.

use serde::{Deserialize, Serialize};

use crate::value_type::ValueType;

/// Errors raised by [`RowMetadata`] operations and row conformance checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowMetaError {
    /// A field with the same name (ignoring case) already exists.
    #[error("duplicate field '{name}'")]
    DuplicateField { name: String },

    /// No field with the requested name exists.
    #[error("field '{name}' not found")]
    NotFound { name: String },

    /// A row carries a different number of values than the metadata has fields.
    #[error("row has {actual} values but metadata declares {expected} fields")]
    ArityMismatch { expected: usize, actual: usize },

    /// A non-null value does not match its field's declared type.
    #[error("field '{field}' expects {expected} but row holds {actual}")]
    TypeMismatch {
        field: String,
        expected: ValueType,
        actual: ValueType,
    },
}

/// Description of one field: name, semantic type, and sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, unique within a [`RowMetadata`] ignoring case.
    pub name: String,
    /// Semantic value type.
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Declared length (characters for strings, digits for numbers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Declared number of fractional digits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Name of the step that produced this field.
    #[serde(default)]
    pub origin: String,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
            origin: String::new(),
        }
    }

    #[must_use]
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Copy of this descriptor under a new name, keeping type and sizing.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        names_match(&self.name, name)
    }
}

/// Compare field names ignoring case, with full Unicode case folding.
pub fn names_match(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Case-folded form of a field name, for use as a set or map key.
pub fn folded_name(name: &str) -> String {
    name.to_lowercase()
}

/// Ordered, name-unique list of [`FieldDescriptor`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldDescriptor>", into = "Vec<FieldDescriptor>")]
pub struct RowMetadata {
    fields: Vec<FieldDescriptor>,
}

impl TryFrom<Vec<FieldDescriptor>> for RowMetadata {
    type Error = RowMetaError;

    fn try_from(fields: Vec<FieldDescriptor>) -> Result<Self, Self::Error> {
        Self::from_fields(fields)
    }
}

impl From<RowMetadata> for Vec<FieldDescriptor> {
    fn from(meta: RowMetadata) -> Self {
        meta.fields
    }
}

impl RowMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build metadata from a field list, rejecting duplicate names.
    ///
    /// # Errors
    ///
    /// Returns [`RowMetaError::DuplicateField`] on the first collision.
    pub fn from_fields(
        fields: impl IntoIterator<Item = FieldDescriptor>,
    ) -> Result<Self, RowMetaError> {
        let mut meta = Self::new();
        for field in fields {
            meta.add_field(field)?;
        }
        Ok(meta)
    }

    /// Append a field.
    ///
    /// # Errors
    ///
    /// Returns [`RowMetaError::DuplicateField`] if the name already exists
    /// (ignoring case); the metadata is unchanged in that case.
    pub fn add_field(&mut self, field: FieldDescriptor) -> Result<(), RowMetaError> {
        if self.index_of(&field.name).is_some() {
            return Err(RowMetaError::DuplicateField { name: field.name });
        }
        self.fields.push(field);
        Ok(())
    }

    /// Append all of `other`'s fields, stamping them with `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`RowMetaError::DuplicateField`] if any incoming name collides
    /// with an existing field or with another incoming field. Nothing is
    /// appended when an error is returned.
    pub fn merge(&mut self, other: &RowMetadata, origin: &str) -> Result<(), RowMetaError> {
        for (i, incoming) in other.fields.iter().enumerate() {
            let clashes_existing = self.index_of(&incoming.name).is_some();
            let clashes_incoming = other.fields[..i].iter().any(|f| f.is_named(&incoming.name));
            if clashes_existing || clashes_incoming {
                return Err(RowMetaError::DuplicateField {
                    name: incoming.name.clone(),
                });
            }
        }
        self.fields.extend(
            other
                .fields
                .iter()
                .map(|f| f.clone().with_origin(origin)),
        );
        Ok(())
    }

    /// Look up a field by name (ignoring case).
    ///
    /// # Errors
    ///
    /// Returns [`RowMetaError::NotFound`] if no field has that name.
    pub fn find(&self, name: &str) -> Result<&FieldDescriptor, RowMetaError> {
        self.fields
            .iter()
            .find(|f| f.is_named(name))
            .ok_or_else(|| RowMetaError::NotFound {
                name: name.to_string(),
            })
    }

    /// Position of the named field, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.is_named(name))
    }

    pub fn field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldDescriptor> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<'a> IntoIterator for &'a RowMetadata {
    type Item = &'a FieldDescriptor;
    type IntoIter = std::slice::Iter<'a, FieldDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowMetadata {
        RowMetadata::from_fields([
            FieldDescriptor::new("id", ValueType::Integer).with_length(9),
            FieldDescriptor::new("name", ValueType::String).with_length(50),
        ])
        .unwrap()
    }

    #[test]
    fn find_missing_then_present() {
        let mut meta = sample();
        assert_eq!(
            meta.find("amount"),
            Err(RowMetaError::NotFound {
                name: "amount".into()
            })
        );

        let amount = FieldDescriptor::new("amount", ValueType::Number).with_precision(2);
        meta.add_field(amount.clone()).unwrap();
        assert_eq!(meta.find("amount").unwrap(), &amount);
        assert_eq!(meta.index_of("AMOUNT"), Some(2));
    }

    #[test]
    fn duplicate_detection_folds_non_ascii_case() {
        let mut meta = RowMetadata::from_fields([FieldDescriptor::new("Émail", ValueType::String)]).unwrap();
        let err = meta
            .add_field(FieldDescriptor::new("émail", ValueType::String))
            .unwrap_err();
        assert_eq!(err, RowMetaError::DuplicateField { name: "émail".into() });
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.index_of("ÉMAIL"), Some(0));
        assert!(names_match("ÇA", "ça"));
        assert!(!names_match("ça", "ca"));
    }

    #[test]
    fn deserializing_rejects_duplicate_names() {
        let json = r#"[
            {"name": "id", "type": "integer"},
            {"name": "ID", "type": "string"}
        ]"#;
        let err = serde_json::from_str::<RowMetadata>(json).unwrap_err();
        assert!(err.to_string().contains("ID"), "{err}");

        let ok: RowMetadata = serde_json::from_str(&serde_json::to_string(&sample()).unwrap()).unwrap();
        assert_eq!(ok, sample());
    }

    #[test]
    fn add_field_rejects_case_insensitive_duplicate() {
        let mut meta = sample();
        let before = meta.clone();
        let err = meta
            .add_field(FieldDescriptor::new("NAME", ValueType::Integer))
            .unwrap_err();
        assert_eq!(err, RowMetaError::DuplicateField { name: "NAME".into() });
        assert_eq!(meta, before);
    }

    #[test]
    fn merge_stamps_origin_and_keeps_names() {
        let mut meta = sample();
        let other = RowMetadata::from_fields([
            FieldDescriptor::new("created", ValueType::Date).with_origin("upstream"),
        ])
        .unwrap();
        meta.merge(&other, "cube input").unwrap();
        let created = meta.find("created").unwrap();
        assert_eq!(created.origin, "cube input");
        assert_eq!(meta.len(), 3);
    }

    #[test]
    fn merge_is_all_or_nothing() {
        let mut meta = sample();
        let before = meta.clone();
        let other = RowMetadata::from_fields([
            FieldDescriptor::new("fresh", ValueType::Boolean),
            FieldDescriptor::new("Id", ValueType::Integer),
        ])
        .unwrap();
        let err = meta.merge(&other, "x").unwrap_err();
        assert_eq!(err, RowMetaError::DuplicateField { name: "Id".into() });
        assert_eq!(meta, before);
    }

    #[test]
    fn clone_is_independent() {
        let meta = sample();
        let mut copy = meta.clone();
        copy.add_field(FieldDescriptor::new("extra", ValueType::Binary))
            .unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(copy.len(), 3);
    }

    #[test]
    fn renamed_keeps_type_and_sizing() {
        let meta = sample();
        let label = meta.find("name").unwrap().renamed("label");
        assert_eq!(label.name, "label");
        assert_eq!(label.value_type, ValueType::String);
        assert_eq!(label.length, Some(50));
    }

    #[test]
    fn serde_roundtrip_skips_absent_sizing() {
        let meta = sample();
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json[1].get("precision").is_none());
        assert_eq!(json[0]["type"], "integer");
        let back: RowMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
