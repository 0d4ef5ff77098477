use std::path::Path;

use anyhow::Result;

use bulkbyte_engine::{Context, StepRuntime};

/// Execute the `ddl` command: print `ALTER TABLE` statements for every mapped column.
pub fn execute(step_path: &Path) -> Result<()> {
    let config = super::load_step(step_path)?;
    let input = super::input_metadata(&config)?;

    let ctx = Context::new(config.pipeline.clone(), config.step.clone());
    let runtime = StepRuntime::new(ctx, config)?;
    for statement in runtime.ddl_preview(&input)? {
        println!("{statement};");
    }
    Ok(())
}
