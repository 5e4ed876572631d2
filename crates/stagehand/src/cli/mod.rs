//! Command handlers for the stagehand binary.
//!
//! Every handler loads the config, opens the ledger and performs one
//! operation; only `run` stays resident.

pub mod output;

use anyhow::{bail, Context, Result};
use stagehand_core::config::WatchConfig;
use stagehand_core::{scan_once, FileStatus, IntakeService, Ledger, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Create folders, write the config file and initialize the ledger database.
pub async fn init(
    config_path: &Path,
    watch: Vec<PathBuf>,
    archive: Option<PathBuf>,
    recursive: bool,
    poll_seconds: Option<f64>,
    settle_seconds: Option<f64>,
) -> Result<()> {
    let defaults = WatchConfig::default();
    let config = WatchConfig {
        watched_folders: watch,
        archive_folder: archive.unwrap_or(defaults.archive_folder),
        recursive,
        poll_seconds: poll_seconds.unwrap_or(defaults.poll_seconds),
        settle_seconds: settle_seconds.unwrap_or(defaults.settle_seconds),
        ..defaults
    };
    config.validate().context("Invalid configuration")?;

    for folder in &config.watched_folders {
        std::fs::create_dir_all(folder)
            .with_context(|| format!("Failed to create watched folder {}", folder.display()))?;
    }
    std::fs::create_dir_all(&config.archive_folder).with_context(|| {
        format!(
            "Failed to create archive folder {}",
            config.archive_folder.display()
        )
    })?;

    config
        .save(config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    // Opening the store creates the schema.
    open_ledger(&config).await?;

    println!("Initialized. Config written to {}", config_path.display());
    for folder in &config.watched_folders {
        println!("  watching {}", folder.display());
    }
    println!("  archive  {}", config.archive_folder.display());
    println!("  ledger   {}", config.database_path.display());
    Ok(())
}

/// Per-status counts plus the last scan time.
pub async fn status(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(&config).await?;
    let health = ledger.health().await?;

    println!("{}", output::counts_table(&health.counts));
    match health.last_scan_at {
        Some(at) => println!("Last scan: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last scan: never"),
    }
    Ok(())
}

pub async fn list(config_path: &Path, status: Option<String>, limit: i64) -> Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(&config).await?;

    let filter = match status.as_deref() {
        None => None,
        Some(s) => match FileStatus::parse(s) {
            Some(status) => Some(status),
            None => bail!(
                "unknown status '{s}' (expected one of: {})",
                FileStatus::ALL.map(|s| s.as_str()).join(", ")
            ),
        },
    };

    let records = ledger.list(filter, limit).await?;
    if records.is_empty() {
        println!("No staged files.");
        return Ok(());
    }
    println!("{}", output::records_table(&records));
    Ok(())
}

/// One sweep of the watched folders, then exit.
pub async fn scan(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(&config).await?;

    let processed = scan_once(&ledger, &config).await?;
    let counts = ledger.health().await?.counts;
    println!(
        "Scan complete: {processed} file(s) processed ({} new, {} reviewed)",
        counts.new, counts.reviewed
    );
    Ok(())
}

/// Watch continuously until Ctrl-C.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(&config).await?;

    // Catch up on anything that arrived while we were not running.
    let processed = scan_once(&ledger, &config).await?;
    info!(processed, "Startup scan complete");

    let service = IntakeService::start(Arc::new(config), ledger);
    println!("Watching. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    service.shutdown();
    println!("Stopped.");
    Ok(())
}

pub async fn review(config_path: &Path, id: i64) -> Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(&config).await?;
    let record = ledger.review(id).await?;
    println!("#{} {} -> {}", record.id, record.original_name, record.status);
    Ok(())
}

pub async fn archive(config_path: &Path, id: i64) -> Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(&config).await?;
    let record = ledger.archive(id, &config.archive_folder).await?;
    println!("#{} archived to {}", record.id, record.path);
    Ok(())
}

pub async fn reject(config_path: &Path, id: i64) -> Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(&config).await?;
    let record = ledger.reject(id).await?;
    println!("#{} {} -> {}", record.id, record.original_name, record.status);
    Ok(())
}

pub async fn rename(config_path: &Path, id: i64, new_name: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(&config).await?;
    let record = ledger.rename(id, new_name).await?;
    println!("#{} renamed to {}", record.id, record.path);
    Ok(())
}

pub async fn tag(config_path: &Path, id: i64, tags: Vec<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(&config).await?;
    let record = ledger.tag(id, &tags).await?;
    println!("#{} tags: {}", record.id, record.tags.join(", "));
    Ok(())
}

pub async fn history(config_path: &Path, id: i64) -> Result<()> {
    let config = load_config(config_path)?;
    let ledger = open_ledger(&config).await?;
    let record = ledger.get(id).await?;
    let transitions = ledger.history(id).await?;

    println!("#{} {} ({})", record.id, record.original_name, record.identity);
    println!("{}", output::history_table(&transitions));
    Ok(())
}

fn load_config(config_path: &Path) -> Result<WatchConfig> {
    if !config_path.exists() {
        bail!(
            "no config found at {}; run `stagehand init --watch <folder>` first",
            config_path.display()
        );
    }
    WatchConfig::load(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
}

async fn open_ledger(config: &WatchConfig) -> Result<Ledger> {
    let store = Store::open(&config.database_path).await.with_context(|| {
        format!(
            "Failed to open ledger database at {}",
            config.database_path.display()
        )
    })?;
    Ok(Ledger::new(store))
}
