//! # Devotional generator (`devotional`)
//!
//! Produces one novel daily devotional per calendar date. Candidates come from
//! a priority-ordered chain of text-generation providers and must pass the
//! novelty gate (title, content and scripture checks against recent history)
//! before they are persisted; when nothing passes, a deterministic canned
//! devotional is written instead.
//!
//! ```bash
//! # Today's devotional (no-op if it already exists)
//! devotional generate
//!
//! # A specific date, replacing whatever is there
//! devotional generate --date 2026-10-16 --force
//!
//! # Rebuild content_tracker.json from the devotionals directory
//! devotional index
//! ```

mod config;
mod errors;
mod generation;
mod models;
mod novelty;
mod providers;
mod storage;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::errors::AppError;
use crate::generation::orchestrator::{Orchestrator, RunOptions, RunOutcome};
use crate::providers::chain::ProviderChain;
use crate::storage::index;
use crate::storage::store::ArtifactStore;

#[derive(Parser)]
#[command(
    name = "devotional",
    about = "Generate one novel daily devotional per date",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the devotional for a date (defaults to today, UTC).
    Generate {
        /// Target date, YYYY-MM-DD.
        #[arg(long, env = "TARGET_DATE")]
        date: Option<NaiveDate>,

        /// Overwrite an existing devotional for the date.
        #[arg(long, env = "FORCE_OVERWRITE")]
        force: bool,
    },

    /// Rebuild the tracker index from persisted devotionals.
    Index,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // so TARGET_DATE / FORCE_OVERWRITE in .env reach clap
    let cli = Cli::parse();

    let config = Config::from_env()
        .map_err(AppError::from)
        .context("Failed to load configuration")?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting devotional v{}", env!("CARGO_PKG_VERSION"));
    for name in &config.skipped_providers {
        info!("{name} API key not configured, skipping");
    }

    let store = ArtifactStore::open(&config.devotional_dir, config.write_markdown)
        .map_err(AppError::from)
        .with_context(|| {
            format!(
                "Failed to open devotionals directory {}",
                config.devotional_dir.display()
            )
        })?;

    match cli.command {
        Command::Generate { date, force } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());

            let chain =
                ProviderChain::from_descriptors(&config.providers, config.provider_timeout, config.retry)
                    .map_err(AppError::ProviderSetup)?;
            if chain.is_empty() {
                warn!("No provider API keys configured; only the fallback devotional is available");
            } else {
                info!("Provider order: {}", chain.provider_names().join(" → "));
            }

            let orchestrator = Orchestrator::new(config, store, chain);
            match orchestrator.run(RunOptions { date, force }).await {
                Ok(outcome) => report(&outcome),
                Err(e) => {
                    error!("Generation failed for {date}: {e}");
                    return Err(e).context(format!("Failed to generate devotional for {date}"));
                }
            }
        }
        Command::Index => {
            let index = index::refresh(&store, &config.tracker_path)
                .map_err(AppError::from)
                .context("Failed to rebuild tracker index")?;
            info!(
                "Wrote {} ({} devotionals)",
                config.tracker_path.display(),
                index.count
            );
        }
    }

    Ok(())
}

fn report(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Skipped { date } => {
            info!("Devotional for {date} already exists; nothing to do");
        }
        RunOutcome::Accepted {
            artifact,
            path,
            warnings,
        } => {
            info!(
                "Wrote \"{}\" ({} words, {}) to {}",
                artifact.title,
                artifact.word_count,
                artifact.provenance,
                path.display()
            );
            if !warnings.is_empty() {
                warn!("Accepted with {} novelty warning(s)", warnings.len());
            }
        }
        RunOutcome::Fallback { artifact, path } => {
            warn!(
                "Wrote fallback devotional \"{}\" to {} (consider manual review)",
                artifact.title,
                path.display()
            );
        }
    }
}
