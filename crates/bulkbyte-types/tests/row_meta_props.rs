//! Property tests for `RowMetadata` lookup and uniqueness.

use bulkbyte_types::{FieldDescriptor, RowMetaError, RowMetadata, ValueType};
use proptest::prelude::*;

fn value_type() -> impl Strategy<Value = ValueType> {
    prop_oneof![
        Just(ValueType::String),
        Just(ValueType::Integer),
        Just(ValueType::Number),
        Just(ValueType::BigNumber),
        Just(ValueType::Date),
        Just(ValueType::Boolean),
        Just(ValueType::Binary),
    ]
}

fn descriptor(name: String) -> impl Strategy<Value = FieldDescriptor> {
    (value_type(), proptest::option::of(0u32..40), proptest::option::of(0u32..6)).prop_map(
        move |(vt, length, precision)| FieldDescriptor {
            name: name.clone(),
            value_type: vt,
            length,
            precision,
            origin: String::new(),
        },
    )
}

fn metadata() -> impl Strategy<Value = RowMetadata> {
    proptest::collection::btree_set("[a-z][a-z0-9_]{0,7}", 0..8).prop_map(|names| {
        RowMetadata::from_fields(
            names
                .into_iter()
                .map(|n| FieldDescriptor::new(n, ValueType::String)),
        )
        .unwrap()
    })
}

proptest! {
    #[test]
    fn absent_name_is_not_found_until_added(
        meta in metadata(),
        d in "[A-Z][A-Z0-9]{0,6}_x".prop_flat_map(descriptor),
    ) {
        let mut meta = meta;
        prop_assume!(meta.index_of(&d.name).is_none());
        prop_assert_eq!(
            meta.find(&d.name),
            Err(RowMetaError::NotFound { name: d.name.clone() })
        );
        meta.add_field(d.clone()).unwrap();
        prop_assert_eq!(meta.find(&d.name).unwrap(), &d);
        prop_assert_eq!(meta.find(&d.name.to_lowercase()).unwrap(), &d);
    }

    #[test]
    fn colliding_name_fails_and_leaves_metadata_unchanged(
        meta in metadata(),
        pick in any::<prop::sample::Index>(),
        vt in value_type(),
        upper in any::<bool>(),
    ) {
        prop_assume!(!meta.is_empty());
        let existing = meta.fields()[pick.index(meta.len())].name.clone();
        let clash = if upper { existing.to_uppercase() } else { existing.clone() };
        let before = meta.clone();
        let mut meta = meta;
        let err = meta.add_field(FieldDescriptor::new(clash.clone(), vt)).unwrap_err();
        prop_assert_eq!(err, RowMetaError::DuplicateField { name: clash });
        prop_assert_eq!(meta, before);
    }

    #[test]
    fn merge_preserves_order_and_names(a in metadata(), b in metadata()) {
        let disjoint = b.iter().all(|f| a.index_of(&f.name).is_none());
        let mut merged = a.clone();
        let outcome = merged.merge(&b, "origin");
        if disjoint {
            prop_assert!(outcome.is_ok());
            prop_assert_eq!(merged.len(), a.len() + b.len());
            let names: Vec<&str> = a.field_names().into_iter().chain(b.field_names()).collect();
            prop_assert_eq!(merged.field_names(), names);
        } else {
            prop_assert!(outcome.is_err());
            prop_assert_eq!(merged, a);
        }
    }
}
