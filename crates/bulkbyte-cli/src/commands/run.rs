use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use tokio_util::sync::CancellationToken;

use bulkbyte_engine::{Context, CubeFileSource, StepRuntime};
use bulkbyte_types::StepResult;

/// Execute the `run` command: parse, validate, and run a step over its input cube.
pub async fn execute(step_path: &Path, limit: Option<u64>) -> Result<ExitCode> {
    let mut config = super::load_step(step_path)?;
    if let Some(limit) = limit {
        config.input.limit = limit;
    }

    let cube = config
        .input
        .cube
        .clone()
        .context("`run` reads rows from input.cube; inline input.fields need an embedding host")?;

    tracing::info!(
        pipeline = config.pipeline,
        step = config.step,
        input = %cube.display(),
        columns = config.mapping.len(),
        "Step validated"
    );

    let ctx = Context::new(config.pipeline.clone(), config.step.clone());
    let limit = config.input.limit;
    let runtime = StepRuntime::new(ctx, config)?;
    let (meta, source) = CubeFileSource::open(&cube, limit)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling step");
            on_signal.cancel();
        }
    });

    let result = runtime.run(&meta, source, cancel).await?;
    print_summary(runtime.config().step.as_str(), &result);

    let json = serde_json::to_string(&result).context("Failed to serialize step result")?;
    println!("@@STEP_JSON@@{json}");

    Ok(if result.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(step: &str, result: &StepResult) {
    let status = if result.cancelled {
        "was cancelled"
    } else if result.succeeded {
        "completed successfully"
    } else {
        "failed"
    };
    println!("Step '{step}' {status}.");
    println!("  Rows read:       {}", result.rows_read);
    println!("  Rows written:    {}", result.rows_written);
    println!("  Errors:          {}", result.error_count);
    println!("  Duration:        {:.2}s", result.duration_secs);
    if result.duration_secs > 0.0 {
        println!(
            "  Throughput:      {:.0} rows/sec",
            result.rows_written as f64 / result.duration_secs
        );
    }
    if let Some(sink) = &result.sink {
        println!("  Loader exit:     {}", sink.exit_code);
        println!("  Bytes streamed:  {}", format_bytes(sink.bytes_written));
        if !sink.stdout.is_empty() {
            println!("  Loader output:   {}", sink.stdout);
        }
    }
    for file in &result.files {
        println!("  Output file:     {}", file.path.display());
    }
    if let Some(err) = &result.error {
        println!("  Error:           {err}");
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
