//! Semantic validation for parsed step configuration values.

use std::collections::HashSet;

use anyhow::{bail, Result};
use bulkbyte_types::error::StepError;
use bulkbyte_types::row_meta::{folded_name, RowMetadata};

use crate::config::types::StepConfig;
use crate::dialect::DatabaseFamily;

/// Validate a parsed step configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the step config.
pub fn validate_step(config: &StepConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported step version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.step.trim().is_empty() {
        errors.push("Step name must not be empty".to_string());
    }

    if config.mapping.is_empty() {
        errors.push("Mapping must define at least one field".to_string());
    }

    let mut columns = HashSet::new();
    for (i, entry) in config.mapping.entries().iter().enumerate() {
        if entry.stream.trim().is_empty() {
            errors.push(format!("Mapping entry {i} has an empty stream field"));
        }
        if entry.column.trim().is_empty() {
            errors.push(format!("Mapping entry {i} has an empty column"));
        } else if !columns.insert(folded_name(&entry.column)) {
            errors.push(format!("Column '{}' is mapped more than once", entry.column));
        }
    }

    if !config.has_loader() && config.output.is_none() {
        errors.push("Step needs a connection, a loader command, or an output file".to_string());
    }

    if config.has_loader() {
        validate_loader(config, &mut errors);
    }

    if let Some(output) = &config.output {
        if output.path.as_os_str().is_empty() {
            errors.push("output.path must not be empty".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Step validation failed:\n  - {}", errors.join("\n  - "));
    }
}

fn validate_loader(config: &StepConfig, errors: &mut Vec<String>) {
    let loader = &config.loader;

    if loader.delimiter.is_empty() {
        errors.push("loader.delimiter must not be empty".to_string());
    }
    if loader.open_timeout_ms == 0 {
        errors.push("loader.open_timeout_ms must be > 0".to_string());
    }
    if loader.finish_timeout_ms == 0 {
        errors.push("loader.finish_timeout_ms must be > 0".to_string());
    }
    if let Some(command) = &loader.command {
        if command.program.trim().is_empty() {
            errors.push("loader.command.program must not be empty".to_string());
        }
        return;
    }

    let Some(connection) = &config.connection else {
        return;
    };
    if config.target.table.trim().is_empty() {
        errors.push("target.table is required for a bulk load".to_string());
    }
    match connection.family {
        DatabaseFamily::Hypersonic => errors.push(
            "hypersonic has no bulk loader; configure loader.command".to_string(),
        ),
        DatabaseFamily::Postgres if loader.replace || loader.ignore_errors => errors.push(
            "postgres \\copy supports neither loader.replace nor loader.ignore_errors".to_string(),
        ),
        DatabaseFamily::Postgres if loader.delimiter.chars().count() != 1 => {
            errors.push("postgres \\copy needs a single-character delimiter".to_string());
        }
        _ => {}
    }
}

/// Check the mapping against upstream metadata, reporting every missing field.
///
/// # Errors
///
/// Returns a `config` error with code `FIELD_NOT_FOUND` listing all mapped
/// stream fields that `input` does not declare.
pub fn validate_against_metadata(config: &StepConfig, input: &RowMetadata) -> Result<(), StepError> {
    let missing = config.mapping.missing_fields(input);
    if missing.is_empty() {
        return Ok(());
    }
    Err(StepError::config(
        "FIELD_NOT_FOUND",
        format!(
            "mapped field(s) not found in upstream row: {}",
            missing.join(", ")
        ),
    )
    .with_details(serde_json::json!({ "missing": missing })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_step_str;
    use bulkbyte_types::row_meta::FieldDescriptor;
    use bulkbyte_types::value_type::ValueType;

    fn valid_yaml() -> &'static str {
        r#"
version: "1.0"
step: load_customers
connection:
  family: mysql
  host: localhost
  database: shop
target:
  table: customers
mapping:
  - stream: id
    column: id
  - stream: name
    column: label
    format: STRING_ESC
"#
    }

    #[test]
    fn valid_step_passes() {
        let config = parse_step_str(valid_yaml()).unwrap();
        assert!(validate_step(&config).is_ok());
    }

    #[test]
    fn wrong_version_fails() {
        let yaml = valid_yaml().replace("\"1.0\"", "\"2.0\"");
        let config = parse_step_str(&yaml).unwrap();
        let err = validate_step(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported step version"));
    }

    #[test]
    fn all_problems_reported_together() {
        let yaml = valid_yaml()
            .replace("load_customers", "\"\"")
            .replace("table: customers", "table: \"\"");
        let config = parse_step_str(&yaml).unwrap();
        let err = validate_step(&config).unwrap_err().to_string();
        assert!(err.contains("Step name must not be empty"));
        assert!(err.contains("target.table is required"));
    }

    #[test]
    fn duplicate_columns_fail() {
        let yaml = valid_yaml().replace("column: label", "column: ID");
        let config = parse_step_str(&yaml).unwrap();
        let err = validate_step(&config).unwrap_err().to_string();
        assert!(err.contains("mapped more than once"));
    }

    #[test]
    fn duplicate_columns_fold_non_ascii_case() {
        let yaml = valid_yaml()
            .replace("column: id", "column: Été")
            .replace("column: label", "column: éTÉ");
        let config = parse_step_str(&yaml).unwrap();
        let err = validate_step(&config).unwrap_err().to_string();
        assert!(err.contains("Column 'éTÉ' is mapped more than once"), "{err}");
    }

    #[test]
    fn hypersonic_needs_command_override() {
        let yaml = valid_yaml().replace("family: mysql", "family: hypersonic");
        let config = parse_step_str(&yaml).unwrap();
        assert!(validate_step(&config)
            .unwrap_err()
            .to_string()
            .contains("no bulk loader"));

        let yaml = format!("{yaml}loader:\n  command:\n    program: cat\n    args: [\"{{pipe}}\"]\n");
        let config = parse_step_str(&yaml).unwrap();
        assert!(validate_step(&config).is_ok());
    }

    #[test]
    fn postgres_rejects_replace() {
        let yaml = format!(
            "{}loader:\n  replace: true\n",
            valid_yaml().replace("family: mysql", "family: postgres")
        );
        let config = parse_step_str(&yaml).unwrap();
        assert!(validate_step(&config).unwrap_err().to_string().contains("replace"));
    }

    #[test]
    fn step_without_any_target_fails() {
        let yaml = r#"
version: "1.0"
step: orphan
mapping:
  - { stream: id, column: id }
"#;
        let config = parse_step_str(yaml).unwrap();
        assert!(validate_step(&config)
            .unwrap_err()
            .to_string()
            .contains("needs a connection"));
    }

    #[test]
    fn metadata_check_lists_every_missing_field() {
        let yaml = valid_yaml().replace("stream: id", "stream: key");
        let config = parse_step_str(&yaml).unwrap();
        let input = RowMetadata::from_fields([FieldDescriptor::new("id", ValueType::Integer)]).unwrap();
        let err = validate_against_metadata(&config, &input).unwrap_err();
        assert_eq!(err.code, "FIELD_NOT_FOUND");
        assert_eq!(err.details.unwrap()["missing"], serde_json::json!(["key", "name"]));
    }
}
