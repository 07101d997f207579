//! # Variant Digest
//!
//! Scrapes per-country genomic variant shares from a public tracker, keeps
//! the last complete scrape as a snapshot, and republishes a formatted digest
//! (per-country report plus rendered classification tables) to a Discord
//! channel on a fixed interval.
//!
//! ## Usage
//!
//! ```sh
//! variant_digest --config digest.yaml run
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Scraping**: Fetch the variant config, then every variant's country counts
//! 2. **Storing**: Swap the in-memory dataset and persist it atomically
//! 3. **Rendering**: Extract the agency's classification tables and rasterize them
//! 4. **Publishing**: Purge recent channel history and post the digest in order

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod channel;
mod cli;
mod config;
mod countries;
mod models;
mod outputs;
mod publisher;
mod scheduler;
mod scrapers;
mod store;
mod utils;

use channel::Channel;
use channel::console::ConsoleChannel;
use channel::discord::DiscordChannel;
use channel::retry::RetryChannel;
use cli::{Cli, Command};
use config::{Settings, load_token};
use models::Dataset;
use outputs::render::{ExternalRenderer, HtmlRenderer};
use publisher::{PublishError, Publication, publish};
use scheduler::{DatasetHandle, Pipeline};
use scrapers::fetch::{Fetch, HttpFetcher};

const CHANNEL_MAX_RETRIES: usize = 5;
const CHANNEL_BASE_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("variant_digest starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.config, dry_run = args.dry_run, command = ?args.command, "Parsed CLI arguments");

    let settings = Settings::load(args.config.as_deref())?;
    let fetcher = HttpFetcher::new(settings.request_timeout_secs.map(Duration::from_secs))?;
    let renderer = ExternalRenderer::from_settings(&settings.renderer);
    let pipeline = Pipeline::from_settings(&settings, fetcher, renderer)?;
    let handle = DatasetHandle::new();

    match args.command {
        Command::Scrape => {
            let dataset = pipeline.refresh(&handle).await?;
            println!(
                "scrape complete: {} variants, {} countries",
                dataset.variants.len(),
                dataset.countries.len()
            );
        }
        Command::Report { fresh } => {
            let dataset = current_dataset(&pipeline, &handle, fresh).await?;
            let mut publication = Publication::prepare(&dataset, Vec::new())?;
            if fresh {
                publication = publication.after_fresh_scrape();
            }
            publish(&ConsoleChannel, &publication, settings.purge_window).await?;
        }
        Command::Tables => {
            let tables = pipeline.render_tables().await?;
            for table in &tables {
                println!("{}\n{}\n{}\n", table.group_title, table.group_description, table.rendered_path.display());
            }
            println!("tables rendered: {}", tables.len());
        }
        Command::Publish { fresh } => {
            let dataset = current_dataset(&pipeline, &handle, fresh).await?;
            let summary = if args.dry_run {
                pipeline.publish_dataset(&dataset, fresh, &ConsoleChannel).await?
            } else {
                pipeline.publish_dataset(&dataset, fresh, &discord_channel(&settings)?).await?
            };
            println!(
                "publish complete: {} countries, {} tables, {} messages purged",
                summary.countries, summary.tables, summary.purged
            );
        }
        Command::Run => {
            let period = settings.interval();
            info!(interval_hours = settings.interval_hours, "Starting scheduler");
            let cycles = if args.dry_run {
                pipeline.run_forever(&handle, &ConsoleChannel, period, shutdown_signal()).await
            } else {
                let channel = discord_channel(&settings)?;
                pipeline.run_forever(&handle, &channel, period, shutdown_signal()).await
            };
            info!(cycles, "Scheduler stopped");
        }
    }

    let elapsed = start_time.elapsed();
    info!(elapsed_ms = elapsed.as_millis(), "variant_digest finished");
    Ok(())
}

/// The dataset a one-shot command works on: freshly scraped, or the snapshot.
async fn current_dataset<F: Fetch, R: HtmlRenderer>(
    pipeline: &Pipeline<F, R>,
    handle: &DatasetHandle,
    fresh: bool,
) -> Result<Arc<Dataset>, Box<dyn Error>> {
    if fresh {
        return Ok(pipeline.refresh(handle).await?);
    }
    handle.seed_from(pipeline.store()).await;
    handle
        .current()
        .await
        .ok_or_else(|| PublishError::EmptyDataset.into())
}

/// Discord channel from settings and token file, wrapped in retry with backoff.
fn discord_channel(settings: &Settings) -> Result<impl Channel, Box<dyn Error>> {
    let channel_id = settings.channel_id()?;
    let token = load_token(&settings.discord.token_file)?;
    let channel = DiscordChannel::new(&settings.discord.api_base, channel_id, &token)?;
    info!(channel = %channel_id, "Discord channel configured");
    Ok(RetryChannel::new(channel, CHANNEL_MAX_RETRIES, CHANNEL_BASE_DELAY))
}

/// Resolves on Ctrl-C. If the signal handler cannot be installed it never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for Ctrl-C; scheduler will run until killed");
        std::future::pending::<()>().await;
    }
}
