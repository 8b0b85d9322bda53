//! `stacpool check`: build the reader/writer manager and probe both engines

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use stacpool_core::{Engine, PgDriver, PgSessionManager, Role, Settings};
use tracing::{info, instrument, warn};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// TOML settings file ([database] and [pool]); environment variables override it
    #[arg(long, env = "STACPOOL_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Seconds to wait for each engine to open and ping a connection
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Print engine status as JSON
    #[arg(long)]
    pub json: bool,
}

/// Returns the process exit code: 0 when both engines answer
#[instrument(skip_all)]
pub async fn run(args: CheckArgs) -> Result<i32> {
    let settings = match &args.settings {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::from_env().context("failed to read settings from environment")?,
    };
    let manager =
        PgSessionManager::new(PgDriver, &settings).context("failed to build session manager")?;

    let timeout = Duration::from_secs(args.connect_timeout);
    let mut failures = 0;
    for role in [Role::Reader, Role::Writer] {
        let engine = manager.engine(role);
        describe(engine);
        if probe(engine, timeout).await {
            println!("{role}: reachable");
        } else {
            failures += 1;
        }
        if args.json {
            println!("{}", serde_json::to_string(&engine.status())?);
        }
    }

    manager.close();
    info!(failures, "check complete");
    Ok(if failures == 0 { 0 } else { 1 })
}

fn describe(engine: &Engine<PgDriver>) {
    let config = engine.config();
    println!(
        "{}: {} (pool_size={}, max_overflow={}, recycle={}s, timeout={}s, pre_ping={})",
        engine.role(),
        engine.endpoint(),
        config.pool_size,
        config.max_overflow,
        config.recycle_seconds,
        config.timeout_seconds,
        config.pre_ping,
    );
}

async fn probe(engine: &Engine<PgDriver>, timeout: Duration) -> bool {
    let role = engine.role();
    match tokio::time::timeout(timeout, engine.check_reachable()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(%role, error = %e, "engine unreachable");
            println!("{role}: unreachable ({e})");
            false
        }
        Err(_) => {
            warn!(%role, seconds = timeout.as_secs(), "engine check timed out");
            println!("{role}: unreachable (timed out after {}s)", timeout.as_secs());
            false
        }
    }
}
