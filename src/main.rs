// src/main.rs

use clap::{Parser, Subcommand};
use sheetforge::checkpoint::PauseCheckpoint;
use sheetforge::config::Config;
use sheetforge::db::ledger::Ledger;
use sheetforge::orchestrator::{Orchestrator, RunOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sheetforge")]
#[command(author, version, about = "Loads directory trees of spreadsheets into a relational database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the resolved sheet-mapping configuration (YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import every workbook under a data root, creating/evolving one
    /// target table per leaf folder.
    Etl { data_root: PathBuf },
    /// Resume a run that left a pause checkpoint behind.
    Resume { data_root: PathBuf },
    /// Report whether a pause checkpoint is present for a data root.
    Status { data_root: PathBuf },
    /// Delete a previously imported file's rows and ledger entry.
    Revert {
        #[arg(long = "table")]
        table: String,
        #[arg(long = "source-file")]
        source_file: Option<String>,
        #[arg(long = "file-hash")]
        file_hash: Option<String>,
    },
    /// Undo a file's invertible schema changes (added columns).
    RevertSchema {
        #[arg(long = "table")]
        table: String,
        #[arg(long = "source-file")]
        source_file: String,
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run() {
        Ok(checkpointed) => {
            if checkpointed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run() -> sheetforge::Result<bool> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Etl { data_root } => {
            let (mut client, config, options) = bootstrap(cli.config.as_deref())?;
            let cancellation = Orchestrator::install_cancellation_handler()?;
            let mut orchestrator = Orchestrator::new(&mut client, config, options, cancellation);
            let summary = orchestrator.run(&data_root)?;
            report(&summary);
            Ok(summary.checkpointed)
        }
        Commands::Resume { data_root } => {
            let (mut client, config, options) = bootstrap(cli.config.as_deref())?;
            let cancellation = Orchestrator::install_cancellation_handler()?;
            let mut orchestrator = Orchestrator::new(&mut client, config, options, cancellation);
            let summary = orchestrator.resume(&data_root)?;
            report(&summary);
            Ok(summary.checkpointed)
        }
        Commands::Status { data_root } => {
            if PauseCheckpoint::exists(&data_root) {
                if let Some(checkpoint) = PauseCheckpoint::load(&data_root)? {
                    info!(
                        remaining_folders = checkpoint.remaining_folders.len(),
                        remaining_files = checkpoint.remaining_files_in_current_folder.len(),
                        created_at = %checkpoint.created_at,
                        "pause checkpoint present"
                    );
                }
            } else {
                info!("no pause checkpoint present");
            }
            Ok(false)
        }
        Commands::Revert { table, source_file, file_hash } => {
            let database_url = require_database_url()?;
            let mut client = sheetforge::db::connect(&database_url)?;
            let deleted = match (source_file, file_hash) {
                (Some(source_file), None) => Ledger::revert_by_source_file(&mut client, &table, &source_file)?,
                (None, Some(hash)) => Ledger::revert_by_fingerprint(&mut client, &table, &hash)?,
                _ => {
                    return Err(sheetforge::Error::Config(
                        "revert requires exactly one of --source-file or --file-hash".to_string(),
                    ))
                }
            };
            info!(table = %table, rows_deleted = deleted, "reverted import");
            Ok(false)
        }
        Commands::RevertSchema { table, source_file, dry_run } => {
            let database_url = require_database_url()?;
            let mut client = sheetforge::db::connect(&database_url)?;
            let plan = Ledger::revert_schema_changes(&mut client, &table, &source_file, dry_run)?;
            for item in &plan {
                info!(
                    change = ?item.change_type,
                    column = ?item.column_name,
                    invertible = item.invertible,
                    executed = item.executed,
                    "schema revert step"
                );
            }
            Ok(false)
        }
    }
}

fn require_database_url() -> sheetforge::Result<String> {
    std::env::var("DATABASE_URL")
        .map_err(|_| sheetforge::Error::Config("DATABASE_URL is required".to_string()))
}

fn bootstrap(config_path: Option<&std::path::Path>) -> sheetforge::Result<(postgres::Client, Config, RunOptions)> {
    let database_url = require_database_url()?;
    let client = sheetforge::db::connect(&database_url)?;
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config {
            default_sheet: "Sheet1".to_string(),
            mapping: Default::default(),
        },
    };
    let options = RunOptions::from_env();
    Ok((client, config, options))
}

fn report(summary: &sheetforge::orchestrator::RunSummary) {
    for (path, outcome) in &summary.files {
        match outcome {
            sheetforge::orchestrator::FileOutcome::Imported { rows } => {
                info!(file = %path.display(), rows, "imported");
            }
            sheetforge::orchestrator::FileOutcome::Skipped => {
                info!(file = %path.display(), "skipped (already imported)");
            }
            sheetforge::orchestrator::FileOutcome::ReadError(msg) => {
                info!(file = %path.display(), error = %msg, "read error, skipped");
            }
        }
    }
    if summary.checkpointed {
        info!("run stopped early; a pause checkpoint was written");
    }
}
