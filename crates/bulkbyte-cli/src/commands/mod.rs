pub mod check;
pub mod ddl;
pub mod inspect;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use bulkbyte_engine::config::{parser, validator};
use bulkbyte_engine::StepConfig;
use bulkbyte_types::RowMetadata;

/// Parse and structurally validate a step file.
pub(crate) fn load_step(path: &Path) -> Result<StepConfig> {
    let config = parser::parse_step(path)
        .with_context(|| format!("Failed to parse step: {}", path.display()))?;
    validator::validate_step(&config)?;
    Ok(config)
}

/// Input fields declared by the step: the cube header when a cube is
/// configured, otherwise the inline field list.
pub(crate) fn input_metadata(config: &StepConfig) -> Result<RowMetadata> {
    if let Some(cube) = &config.input.cube {
        let reader = bulkbyte_engine::CubeReader::open(cube, 1)
            .with_context(|| format!("Failed to open input cube: {}", cube.display()))?;
        return Ok(reader.meta().clone());
    }
    config
        .input
        .inline_metadata()?
        .context("step declares neither input.cube nor input.fields")
}
