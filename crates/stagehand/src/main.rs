//! Stagehand launcher
//!
//! Stages files dropped into watched folders: watches for arrivals, waits for
//! them to finish writing, records a content identity in the ledger, and
//! drives each record through review to archive or reject.

use clap::{Parser, Subcommand};
use stagehand_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "stagehand", about = "File intake and staging", version)]
struct Cli {
    /// Enable verbose logging (full filter to stderr instead of warn)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file location (default: $STAGEHAND_CONFIG or ~/.stagehand/config.toml)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config file and set up folders and the ledger database
    Init {
        /// Folder to watch; repeat for multiple folders
        #[arg(short = 'w', long = "watch", required = true)]
        watch: Vec<PathBuf>,

        /// Archive destination folder
        #[arg(short = 'a', long)]
        archive: Option<PathBuf>,

        /// Watch subfolders too
        #[arg(short, long)]
        recursive: bool,

        /// Polling interval in seconds
        #[arg(long)]
        poll_seconds: Option<f64>,

        /// Quiet time before a file counts as fully written, in seconds
        #[arg(long)]
        settle_seconds: Option<f64>,
    },

    /// Show per-status counts and the last scan time
    Status,

    /// List staged files
    List {
        /// Filter by status: new, reviewed, archived, rejected
        #[arg(short = 's', long)]
        status: Option<String>,

        /// Maximum number of rows
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: i64,
    },

    /// Scan the watched folders once and exit
    Scan,

    /// Watch continuously until interrupted
    Run,

    /// Mark a staged file as reviewed
    Review { id: i64 },

    /// Archive a staged file (moves it into the archive folder)
    Archive { id: i64 },

    /// Reject a staged file (leaves it on disk)
    Reject { id: i64 },

    /// Rename a staged file on disk
    Rename { id: i64, new_name: String },

    /// Add tags to a staged file
    Tag {
        id: i64,
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Show the transition history of a staged file
    History { id: i64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "stagehand",
        verbose: args.verbose,
    }) {
        eprintln!("warning: logging unavailable: {err:#}");
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let config_path = args
        .config
        .unwrap_or_else(stagehand_core::config::config_path);

    match args.command {
        Commands::Init {
            watch,
            archive,
            recursive,
            poll_seconds,
            settle_seconds,
        } => {
            cli::init(
                &config_path,
                watch,
                archive,
                recursive,
                poll_seconds,
                settle_seconds,
            )
            .await
        }
        Commands::Status => cli::status(&config_path).await,
        Commands::List { status, limit } => cli::list(&config_path, status, limit).await,
        Commands::Scan => cli::scan(&config_path).await,
        Commands::Run => cli::run(&config_path).await,
        Commands::Review { id } => cli::review(&config_path, id).await,
        Commands::Archive { id } => cli::archive(&config_path, id).await,
        Commands::Reject { id } => cli::reject(&config_path, id).await,
        Commands::Rename { id, new_name } => cli::rename(&config_path, id, &new_name).await,
        Commands::Tag { id, tags } => cli::tag(&config_path, id, tags).await,
        Commands::History { id } => cli::history(&config_path, id).await,
    }
}
