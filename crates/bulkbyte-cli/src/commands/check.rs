use std::path::Path;

use anyhow::Result;

use bulkbyte_engine::config::validator;

/// Execute the `check` command: validate step config and its mapping against the input fields.
pub fn execute(step_path: &Path) -> Result<()> {
    let config = super::load_step(step_path)?;
    println!("Step structure:    OK");

    let input = super::input_metadata(&config)?;
    println!("Input fields:      {}", input.field_names().join(", "));

    match validator::validate_against_metadata(&config, &input) {
        Ok(()) => println!("Field mapping:     OK"),
        Err(e) => {
            println!("Field mapping:     FAILED");
            println!("  {e}");
            anyhow::bail!("One or more checks failed");
        }
    }

    if let Some(connection) = &config.connection {
        let dialect = connection.family.dialect();
        println!(
            "Target:            {} {}",
            dialect.family_name(),
            dialect.connection_url(&connection.to_params())
        );
    }

    println!("\nAll checks passed.");
    Ok(())
}
