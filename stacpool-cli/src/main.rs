//! stacpool CLI - connection pool tooling for a PostgreSQL-backed STAC API
//!
//! Subcommands:
//! - `load`: fire bursts of requests at a deployment and report non-200 responses
//! - `check`: build the reader/writer session manager and probe both databases

use anyhow::Result;
use clap::{Parser, Subcommand};
use stacpool_harness::LoadArgs;

mod commands;
mod tracing_setup;

use tracing_setup::TracingConfig;

#[derive(Parser, Debug)]
#[command(
    name = "stacpool",
    author,
    version,
    about = "Pooled database sessions and connection-exhaustion load testing",
    long_about = "Drive a STAC API deployment into connection-pool exhaustion and watch how it \
                  fails, or verify that the reader and writer databases are reachable with the \
                  configured pool settings."
)]
struct Cli {
    /// Debug logging (unless RUST_LOG is set)
    #[arg(long, global = true)]
    debug: bool,

    /// Export traces over OTLP (requires the `telemetry` feature)
    #[arg(long, global = true)]
    otel: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send request bursts to a deployment and print every non-200 response
    Load(LoadArgs),
    /// Probe the reader and writer databases
    Check(commands::check::CheckArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_setup::init(&TracingConfig {
        debug: cli.debug,
        otel: cli.otel,
    })?;

    let result = match cli.command {
        Commands::Load(args) => stacpool_harness::run_load(args).await,
        Commands::Check(args) => commands::check::run(args).await,
    };

    tracing_setup::shutdown_otel();

    let code = result?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
