//! Binary entry point for vecdex.
//!
//! This binary provides the CLI interface for the vecdex vector index engine.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow unnecessary_wraps for consistent command function signatures
#![allow(clippy::unnecessary_wraps)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow option_if_let_else for environment variable fallback chains
#![allow(clippy::option_if_let_else)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use vecdex::commands::CommandHandler;
use vecdex::config::EngineConfig;
use vecdex::observability::{self, LoggingConfig};
use vecdex::VectorEngine;

/// Vecdex - a durable vector similarity index.
#[derive(Parser)]
#[command(name = "vecdex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Add vectors to the index.
    Add {
        /// Vectors as inline JSON (`[[0.1, 0.2], ...]` or a single
        /// `[0.1, 0.2]`), or `@path` to read a JSON file.
        vectors: String,
    },

    /// Search for the nearest vectors.
    Search {
        /// Query vector as inline JSON or `@path`.
        query: String,

        /// Maximum number of results.
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Minimum similarity score (0..1].
        #[arg(short, long)]
        min_score: Option<f32>,
    },

    /// Delete vectors by id.
    Delete {
        /// The ids to delete.
        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Show index status and metrics.
    Stats,

    /// Save the index snapshot.
    Save {
        /// Target path (default: the configured index path).
        path: Option<PathBuf>,
    },

    /// Write a backup copy of the index.
    Backup {
        /// Backup file path.
        path: PathBuf,
    },

    /// Restore the index from a backup file.
    Restore {
        /// Backup file path.
        path: PathBuf,
    },

    /// Replay the write-ahead log through the engine.
    Replay,

    /// Delete write-ahead log files older than the retention window.
    Cleanup {
        /// Retention in days (default: the configured retention).
        #[arg(short, long)]
        days: Option<i64>,
    },

    /// Remove every vector from the index.
    Clear {
        /// Skip confirmation.
        #[arg(short, long)]
        force: bool,
    },

    /// Execute a structured JSON command from an argument or stdin.
    Exec {
        /// Inline JSON command; read from stdin when omitted.
        json: Option<String>,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init_logging(LoggingConfig::from_env(cli.verbose)) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(cli: Cli, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = VectorEngine::open(config).await?;

    match cli.command {
        Commands::Add { vectors } => cmd_add(&engine, &vectors).await,

        Commands::Search {
            query,
            limit,
            min_score,
        } => cmd_search(&engine, &query, limit, min_score).await,

        Commands::Delete { ids } => cmd_delete(&engine, ids).await,

        Commands::Stats => cmd_stats(&engine),

        Commands::Save { path } => cmd_save(&engine, path).await,

        Commands::Backup { path } => cmd_backup(&engine, &path).await,

        Commands::Restore { path } => cmd_restore(&engine, &path).await,

        Commands::Replay => cmd_replay(&engine).await,

        Commands::Cleanup { days } => cmd_cleanup(&engine, days).await,

        Commands::Clear { force } => cmd_clear(&engine, force).await,

        Commands::Exec { json } => cmd_exec(&engine, json).await,
    }
}

/// Loads configuration.
fn load_config(path: Option<&str>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    // If a path is provided, load from that file
    if let Some(config_path) = path {
        return EngineConfig::load_from_file(std::path::Path::new(config_path))
            .map_err(std::convert::Into::into);
    }

    // Environment override for config path
    if let Ok(config_path) = std::env::var("VECDEX_CONFIG_PATH") {
        if !config_path.trim().is_empty() {
            return EngineConfig::load_from_file(std::path::Path::new(&config_path))
                .map_err(std::convert::Into::into);
        }
    }

    // Otherwise, load from default location
    Ok(EngineConfig::load_default())
}

/// Parses vectors from inline JSON or an `@path` file reference.
fn parse_vectors(input: &str) -> Result<Vec<Vec<f32>>, Box<dyn std::error::Error>> {
    let raw = if let Some(path) = input.strip_prefix('@') {
        std::fs::read_to_string(path)?
    } else {
        input.to_string()
    };
    let trimmed = raw.trim();

    // A batch first, then a single vector
    if let Ok(batch) = serde_json::from_str::<Vec<Vec<f32>>>(trimmed) {
        return Ok(batch);
    }
    let single: Vec<f32> = serde_json::from_str(trimmed)?;
    Ok(vec![single])
}

/// Add command.
async fn cmd_add(engine: &VectorEngine, vectors: &str) -> Result<(), Box<dyn std::error::Error>> {
    let batch = parse_vectors(vectors)?;
    let ids = engine.add_vectors(batch).await?;

    println!("Stored {} vector(s)", ids.len());
    println!("  Ids: {ids:?}");

    engine.close().await?;
    Ok(())
}

/// Search command.
async fn cmd_search(
    engine: &VectorEngine,
    query: &str,
    limit: usize,
    min_score: Option<f32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let queries = parse_vectors(query)?;
    let start = Instant::now();
    let results = engine.search_vectors(queries, limit).await?;
    let elapsed = start.elapsed();

    for (distances, ids) in &results {
        let matches: Vec<(f32, i64, f32)> = distances
            .iter()
            .zip(ids.iter())
            .filter(|&(_, &id)| id >= 0)
            .map(|(&distance, &id)| (1.0 / (1.0 + distance), id, distance))
            .filter(|&(score, _, _)| min_score.is_none_or(|threshold| score >= threshold))
            .collect();

        println!("Found {} match(es):", matches.len());
        println!();
        for (score, id, distance) in matches {
            println!("  [{score:.3}] id {id} (distance {distance:.4})");
        }
        println!();
    }
    println!("Search completed in {}ms", elapsed.as_millis());

    Ok(())
}

/// Delete command.
async fn cmd_delete(
    engine: &VectorEngine,
    ids: Vec<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let requested = ids.len();
    let removed = engine.delete_vectors(ids).await?;

    println!("Removed {removed} of {requested} requested vector(s)");
    if (removed as usize) < requested {
        println!("  Note: ids beyond the current count are ignored");
    }

    engine.close().await?;
    Ok(())
}

/// Stats command.
fn cmd_stats(engine: &VectorEngine) -> Result<(), Box<dyn std::error::Error>> {
    let config = engine.config();
    let metrics = engine.get_metrics();

    println!("Vecdex Status");
    println!("=============");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Dimension: {}", config.dimension);
    println!();

    println!("Data Directory: {}", config.data_dir.display());

    let index_path = config.index_path();
    let index_status = if index_path.exists() {
        "Available"
    } else {
        "Not initialized"
    };
    println!("Index Snapshot: {index_status}");
    println!("  Path: {}", index_path.display());

    let wal_files = count_wal_files(&config.wal_dir());
    println!("WAL Files: {wal_files}");
    println!("  Path: {}", config.wal_dir().display());

    println!();
    println!("Vectors: {}", metrics.total_vectors);
    println!("Operations:");
    println!(
        "  Adds: {} ({} vectors)",
        metrics.add_operations, metrics.vectors_added
    );
    println!(
        "  Searches: {} ({} queries)",
        metrics.search_operations, metrics.search_queries
    );
    println!(
        "  Deletes: {} ({} vectors, {} out of range)",
        metrics.delete_operations, metrics.vectors_deleted, metrics.out_of_range_deletes
    );
    println!(
        "  Saves: {} ({} auto)",
        metrics.save_count, metrics.auto_save_count
    );
    println!(
        "  Backups: {} (avg {:.1}ms)",
        metrics.backup_count, metrics.avg_backup_duration_ms
    );
    if metrics.wal_append_failures > 0 {
        println!("  WAL append failures: {}", metrics.wal_append_failures);
    }

    Ok(())
}

/// Counts write-ahead log files in the log directory.
fn count_wal_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map_or(0, |entries| {
        entries
            .filter_map(std::result::Result::ok)
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with("wal_") && n.ends_with(".log"))
            })
            .count()
    })
}

/// Save command.
async fn cmd_save(
    engine: &VectorEngine,
    path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    engine.save_index(path.as_deref()).await?;

    let target = path.unwrap_or_else(|| engine.config().index_path());
    println!("Index saved: {}", target.display());

    Ok(())
}

/// Backup command.
async fn cmd_backup(
    engine: &VectorEngine,
    path: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    engine.create_backup(path).await?;

    println!("Backup created: {}", path.display());
    println!("  Vectors: {}", engine.count()?);
    println!("  Duration: {}ms", start.elapsed().as_millis());

    Ok(())
}

/// Restore command.
async fn cmd_restore(
    engine: &VectorEngine,
    path: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    engine.restore_from_backup(path).await?;

    println!("Index restored: {}", path.display());
    println!("  Vectors: {}", engine.count()?);

    engine.close().await?;
    Ok(())
}

/// Replay command.
async fn cmd_replay(engine: &VectorEngine) -> Result<(), Box<dyn std::error::Error>> {
    println!("Replaying write-ahead log...");

    let replayed = engine.replay_wal().await?;
    println!("Replayed {replayed} operation(s)");
    println!("  Vectors: {}", engine.count()?);

    engine.close().await?;
    Ok(())
}

/// Cleanup command.
async fn cmd_cleanup(
    engine: &VectorEngine,
    days: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let removed = engine.cleanup_wal(days).await?;
    println!("Removed {removed} log file(s)");

    Ok(())
}

/// Clear command.
async fn cmd_clear(engine: &VectorEngine, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !force {
        eprintln!("Refusing to clear the index without --force");
        return Err("clear aborted".into());
    }

    engine.clear_index().await?;
    println!("Index cleared");

    Ok(())
}

/// Exec command: dispatches a structured JSON command.
async fn cmd_exec(
    engine: &VectorEngine,
    json: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let input = match json {
        Some(inline) => inline,
        None => read_command_input()?,
    };

    let handler = CommandHandler::new(engine.clone());
    let response = handler.handle_json(input.trim()).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    // Persist whatever the command changed
    engine.close().await?;

    if response.success {
        Ok(())
    } else {
        Err(response
            .error
            .unwrap_or_else(|| "command failed".to_string())
            .into())
    }
}

/// Reads a command from stdin as a string.
fn read_command_input() -> Result<String, Box<dyn std::error::Error>> {
    use std::io::{self, Read};

    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;

    if input.trim().is_empty() {
        Ok("{}".to_string())
    } else {
        Ok(input)
    }
}
