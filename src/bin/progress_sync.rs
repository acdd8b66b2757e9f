/**
 * progress-sync: operator CLI for the watch progress sync engine
 *
 * Works against the local store configured by `WATCHSYNC_CONFIG` (a TOML
 * file) and the server named by `WATCHSYNC_API_URL`.
 */
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use watchsync::shared::config::API_URL_ENV;
use watchsync::shared::SyncConfig;
use watchsync::sync::SyncEngine;

#[derive(Parser)]
#[command(name = "progress-sync")]
#[command(about = "Operator CLI for the watch progress sync engine")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "WATCHSYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record progress (0-100) for an item
    Update {
        item_id: String,
        #[arg(allow_negative_numbers = true)]
        progress: f64,
    },
    /// Run one sync cycle now
    Sync,
    /// Print the consistency snapshot
    Status,
    /// Print the conflict log of an item
    Conflicts { item_id: String },
    /// Overwrite an item with the server copy
    Recover { item_id: String },
    /// Wipe all local progress state
    Clear,
    /// Sync in the background until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = SyncConfig::load(cli.config.as_deref())?;
    tracing::debug!(
        "Using {} (override with {}), state in {}",
        config.api_base_url,
        API_URL_ENV,
        config.storage_dir.display()
    );
    let engine = SyncEngine::builder(config).build()?;

    match cli.command {
        Command::Update { item_id, progress } => {
            let record = engine.update_progress(&item_id, progress)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Sync => {
            let outcome = engine.sync_now().await;
            println!("{:?}", outcome);
        }
        Command::Status => {
            let status = engine.get_consistency_status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Conflicts { item_id } => {
            let history = engine.conflict_history(&item_id);
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Command::Recover { item_id } => {
            let record = engine.recover_state(&item_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Clear => {
            engine.reset();
            println!("local progress state cleared");
        }
        Command::Watch => watch(engine).await?,
    }

    Ok(())
}

/// Run the scheduler and print every event as a JSON line
async fn watch(engine: SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = engine.subscribe();
    let scheduler = engine.start();
    engine.sync_now().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Dropped {} event(s) while printing", missed)
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    scheduler.shutdown().await;
    Ok(())
}
