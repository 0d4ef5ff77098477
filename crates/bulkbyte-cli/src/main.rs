mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bulkbyte",
    version,
    about = "Stream rows into database bulk loaders through named pipes"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bulk-load step
    Run {
        /// Path to step YAML file
        step: PathBuf,
        /// Maximum rows to read from the input cube (0 = all)
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Validate step configuration against its input fields
    Check {
        /// Path to step YAML file
        step: PathBuf,
    },
    /// Print the column DDL the target table needs
    Ddl {
        /// Path to step YAML file
        step: PathBuf,
    },
    /// Print the header and leading rows of a cube file
    Inspect {
        /// Path to cube file
        cube: PathBuf,
        /// Number of rows to print
        #[arg(short, long, default_value_t = 10)]
        rows: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { step, limit } => commands::run::execute(&step, limit).await,
        Commands::Check { step } => commands::check::execute(&step).map(|()| ExitCode::SUCCESS),
        Commands::Ddl { step } => commands::ddl::execute(&step).map(|()| ExitCode::SUCCESS),
        Commands::Inspect { cube, rows } => {
            commands::inspect::execute(&cube, rows).map(|()| ExitCode::SUCCESS)
        }
    }
}
