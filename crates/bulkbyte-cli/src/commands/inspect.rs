use std::path::Path;

use anyhow::{Context, Result};

use bulkbyte_engine::CubeReader;
use bulkbyte_types::RowValue;

/// Execute the `inspect` command: print a cube file's fields and first rows.
pub fn execute(cube_path: &Path, rows: u64) -> Result<()> {
    let reader = CubeReader::open(cube_path, rows)
        .with_context(|| format!("Failed to open cube: {}", cube_path.display()))?;

    println!("{} field(s):\n", reader.meta().len());
    for field in reader.meta().iter() {
        let mut line = format!("  {:24} {}", field.name, field.value_type);
        match (field.length, field.precision) {
            (Some(len), Some(prec)) => line.push_str(&format!("({len}, {prec})")),
            (Some(len), None) => line.push_str(&format!("({len})")),
            _ => {}
        }
        if !field.origin.is_empty() {
            line.push_str(&format!("  [{}]", field.origin));
        }
        println!("{line}");
    }

    if rows == 0 {
        return Ok(());
    }
    println!();
    let header = reader.meta().field_names().join("\t");
    println!("{header}");
    for row in reader {
        let row = row.context("Failed to read cube row")?;
        let cells: Vec<String> = row.values().iter().map(render).collect();
        println!("{}", cells.join("\t"));
    }
    Ok(())
}

fn render(value: &RowValue) -> String {
    match value {
        RowValue::Null => "<null>".into(),
        RowValue::String(s) => s.clone(),
        RowValue::Integer(i) => i.to_string(),
        RowValue::Number(n) => n.to_string(),
        RowValue::BigNumber(d) => d.to_string(),
        RowValue::Date(d) => d.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        RowValue::Boolean(b) => b.to_string(),
        RowValue::Binary(bytes) => format!("<{} bytes>", bytes.len()),
    }
}
