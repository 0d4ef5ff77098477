//! Step configuration: YAML types, parsing, and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_step, parse_step_str, substitute_env_vars};
pub use types::StepConfig;
pub use validator::{validate_against_metadata, validate_step};
