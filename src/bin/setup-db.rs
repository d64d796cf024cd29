//! `setup-db`: provisions the database schema before the engine goes live.
//!
//! Skips migrations when the schema already exists, always regenerates the
//! client bindings, and exits 1 on any failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use engine_host::config::loader;
use engine_host::config::schema::LogFormat;
use engine_host::db::{CommandTool, DbBootstrap, PgSchemaStore};
use engine_host::observability::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "setup-db")]
#[command(about = "Idempotent database schema bootstrap", long_about = None)]
struct Cli {
    /// Optional TOML configuration file. Environment variables override it.
    #[arg(short, long, env = "ENGINE_CONFIG")]
    config: Option<PathBuf>,
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = loader::load(cli.config.as_deref())?;
    init_logging(config.observability.log_format);

    let bootstrap = DbBootstrap::from_config(&config)?;
    let tool = CommandTool::from_command_line(&config.database.schema_tool)
        .ok_or("SCHEMA_TOOL is empty")?;

    let mut store = PgSchemaStore::connect(bootstrap.database_url()).await?;
    let outcome = bootstrap.run(&mut store, &tool).await?;

    tracing::info!(
        service = "setup-db",
        schema = %outcome.schema_path.display(),
        sentinel_present = outcome.sentinel_present,
        migrated = outcome.migrated,
        "Database ready"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to read .env: {e}");
        }
    }

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            init_logging(LogFormat::Pretty);
            tracing::error!(service = "setup-db", error = %e, "Fatal error during database setup");
            ExitCode::from(1)
        }
    }
}
