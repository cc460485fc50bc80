mod config;
mod db;
mod fetcher;
mod images;
mod parser;
mod pipeline;
mod reconcile;
mod scheduler;
mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use config::Settings;
use db::SqliteStore;
use fetcher::HttpPageSource;
use images::{FsBlobStore, HttpImageSource, ImageCache};
use parser::normalize::ParseContext;
use pipeline::Pipeline;
use scheduler::Scheduler;
use utils::{format_duration, truncate};

#[derive(Parser)]
#[command(name = "shelter_sync", about = "Shelter euthanasia-list scraper")]
struct Cli {
    /// Config file (default: ./shelter_sync.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the listing once and reconcile the store
    Run,
    /// Scrape on a schedule until Ctrl-C
    Serve,
    /// Parse a saved listing page and print the records as JSON
    Parse {
        /// Path to an HTML file
        file: PathBuf,
    },
    /// Stored animals in display order
    List {
        /// Filter by source tag
        #[arg(short, long)]
        source: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Show per-source statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run => {
            let pipeline = build_pipeline(&settings)?;
            let report = pipeline.run_once().await?;
            println!("{}", report);
            Ok(())
        }
        Commands::Serve => {
            let pipeline = Arc::new(build_pipeline(&settings)?);
            let scheduler = Scheduler::new(
                pipeline,
                settings.scrape_interval(),
                settings.startup_delay(),
            );

            let shutdown = CancellationToken::new();
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutdown requested");
                    }
                    shutdown.cancel();
                }
            });

            scheduler.run(shutdown).await;
            Ok(())
        }
        Commands::Parse { file } => parse_file(&settings, &file),
        Commands::List { source, limit } => {
            let store = SqliteStore::open(&settings.database_path)?;
            let rows = store.fetch_records(source.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No animals stored. Run 'run' first.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<9} | {:<16} | {:<20} | {:<14} | {:>4} | {:<10} | {:<6}",
                "#", "ID", "Name", "Breed", "Shelter", "Rank", "Deadline", "Rescue"
            );
            println!("{}", "-".repeat(100));

            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<9} | {:<16} | {:<20} | {:<14} | {:>4} | {:<10} | {:<6}",
                    i + 1,
                    r.external_id,
                    truncate(&r.name, 16),
                    truncate(&r.breed, 20),
                    truncate(&r.shelter, 14),
                    r.shelter_rank,
                    r.deadline,
                    if r.rescue_only { "yes" } else { "" },
                );
            }

            println!("\n{} animals", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let store = SqliteStore::open(&settings.database_path)?;
            let stats = store.get_stats(&settings.fallback_image)?;
            if stats.is_empty() {
                println!("No animals stored.");
            }
            for s in &stats {
                println!("Source:        {}", s.source);
                println!("Animals:       {}", s.total);
                println!("Rescue only:   {}", s.rescue_only);
                println!("No photo:      {}", s.fallback_photos);
                println!("Next deadline: {}", s.next_deadline.as_deref().unwrap_or("-"));
                println!("Last updated:  {}", s.last_updated.as_deref().unwrap_or("-"));
                println!();
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn build_pipeline(settings: &Settings) -> anyhow::Result<Pipeline> {
    let pages = HttpPageSource::new(
        &settings.listing_url,
        &settings.user_agent,
        settings.page_timeout(),
    )?;
    let store = SqliteStore::open(&settings.database_path)?;
    let images = ImageCache::new(
        Arc::new(HttpImageSource::new(&settings.user_agent, settings.image_timeout())?),
        Arc::new(FsBlobStore::new(&settings.image_dir, &settings.image_url_prefix)),
        &settings.fallback_image,
    );

    Ok(Pipeline::new(
        settings.clone(),
        Arc::new(pages),
        Arc::new(store),
        Arc::new(images),
    ))
}

fn parse_file(settings: &Settings, path: &Path) -> anyhow::Result<()> {
    let html = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    let ctx = ParseContext::new(settings, Utc::now())?;

    let mut records = parser::parse_page(&html, &ctx);
    pipeline::sort_by_priority(&mut records);

    println!("{}", serde_json::to_string_pretty(&records)?);
    eprintln!("{} animals", records.len());
    Ok(())
}
