//! bluecast-sync - run one Bluesky-to-Mastodon sync pass

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use libbluecast::logging::{LogFormat, LoggingConfig};
use libbluecast::sync::Outcome;
use libbluecast::{Config, Result, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "bluecast-sync")]
#[command(about = "Cross-post recent Bluesky posts to Mastodon", long_about = None)]
struct Cli {
    /// Path to the config file (TOML)
    #[arg(short, long, env = "BLUECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the state file (overrides the configured location)
    #[arg(short, long, env = "BLUECAST_STATE")]
    state: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Run the full pipeline without publishing or mutating state
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    LoggingConfig::new(LogFormat::Text, level.to_string(), cli.debug).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    if let Some(state) = &cli.state {
        config.sync.state_file = state.to_string_lossy().to_string();
    }

    let mut engine = SyncEngine::from_config(&config, cli.dry_run)?;
    let report = engine.run().await?;

    for outcome in &report.outcomes {
        match &outcome.outcome {
            Outcome::Failed { error } => {
                warn!("Post {} failed: {}", outcome.source_id, error);
            }
            Outcome::SkippedParentFailed { parent_id } => {
                warn!(
                    "Post {} skipped: thread parent {} failed",
                    outcome.source_id, parent_id
                );
            }
            _ => {}
        }
    }

    info!("Sync completed: {}", report.summary());
    println!("{}", report.summary());

    // Individual post failures are retried next run; only fatal errors
    // (already returned above) exit non-zero.
    Ok(())
}
