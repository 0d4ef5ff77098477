//! Step YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::StepConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        missing.dedup();
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a step YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_step_str(yaml_str: &str) -> Result<StepConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: StepConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse step YAML")?;
    Ok(config)
}

/// Parse a step YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_step(path: &Path) -> Result<StepConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read step file: {}", path.display()))?;
    parse_step_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_set_variables() {
        std::env::set_var("BB_TEST_DB_HOST", "db.example.com");
        let result = substitute_env_vars("host: ${BB_TEST_DB_HOST}\nport: 3306").unwrap();
        assert_eq!(result, "host: db.example.com\nport: 3306");
        std::env::remove_var("BB_TEST_DB_HOST");
    }

    #[test]
    fn reports_every_missing_variable() {
        let err = substitute_env_vars("a: ${BB_TEST_UNSET_ONE}\nb: ${BB_TEST_UNSET_TWO}")
            .unwrap_err()
            .to_string();
        assert!(err.contains("BB_TEST_UNSET_ONE"));
        assert!(err.contains("BB_TEST_UNSET_TWO"));
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        assert_eq!(substitute_env_vars("delimiter: \"$\"").unwrap(), "delimiter: \"$\"");
    }

    #[test]
    fn invalid_yaml_has_context() {
        let err = parse_step_str("version: [").unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse step YAML"));
    }

    #[test]
    fn missing_file_names_path() {
        let err = parse_step(Path::new("/no/such/step.yaml")).unwrap_err();
        assert!(err.to_string().contains("/no/such/step.yaml"));
    }
}
