//! Storage tooling for the fieldops application database.
//!
//! Two operator-facing commands: a one-shot migration of legacy on-disk
//! files into the configured storage provider, and a connectivity probe for
//! the persisted storage configuration.

#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use fieldops_config::{ProviderFactory, StorageConfig};
use fieldops_db::{Database, SettingsRepository};
use fieldops_migrate::MigrationEngine;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "fieldops", version, about = "Field operations storage tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Move legacy on-disk files into the configured storage provider,
    /// rewriting database references as it goes. Safe to re-run.
    MigrateFiles {
        /// Path to the application SQLite database.
        #[arg(long)]
        database: PathBuf,
        /// Directory the legacy relative file paths resolve against.
        #[arg(long)]
        legacy_root: PathBuf,
    },
    /// Probe the persisted storage configuration and print the outcome.
    StorageTest {
        /// Path to the application SQLite database.
        #[arg(long)]
        database: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<ExitCode, String> {
    match cli.command {
        Command::MigrateFiles { database, legacy_root } => {
            let db = Database::connect(&database).await.map_err(|err| err.to_string())?;
            let settings = SettingsRepository::from(&db);
            let provider =
                ProviderFactory::new(settings).provider().await.map_err(|err| err.to_string())?;
            let engine = MigrationEngine::new(db.clone(), provider, legacy_root);
            let summary = engine.run().await.map_err(|err| err.to_string())?;
            println!("{summary}");
            db.close().await;
            Ok(if summary.has_failures() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        },
        Command::StorageTest { database } => {
            let db = Database::connect(&database).await.map_err(|err| err.to_string())?;
            let settings = SettingsRepository::from(&db);
            let config =
                StorageConfig::from_settings(&settings).await.map_err(|err| err.to_string())?;
            // Deliberately uncached: this probes exactly what is persisted,
            // not whatever instance the factory last built.
            let provider = ProviderFactory::test_instance(&config).map_err(|err| err.to_string())?;
            let report = provider.test_connection().await;
            println!("{}", report.message);
            db.close().await;
            Ok(if report.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        },
    }
}
