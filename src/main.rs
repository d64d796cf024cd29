//! `engine`: runs the HTTP API, the queue workers, or both.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use engine_host::config::loader;
use engine_host::config::schema::LogFormat;
use engine_host::lifecycle::faults::install_panic_hook;
use engine_host::lifecycle::signals::wait_for_termination;
use engine_host::lifecycle::{EngineLauncher, Orchestrator};
use engine_host::observability::logging::init_logging;
use engine_host::worker::{LocalQueueFactory, LoggingHandler};

#[derive(Parser, Debug)]
#[command(name = "engine")]
#[command(about = "Runs the engine HTTP API and queue workers", long_about = None)]
struct Cli {
    /// Optional TOML configuration file. Environment variables override it.
    #[arg(short, long, env = "ENGINE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to read .env: {e}");
        }
    }
    let cli = Cli::parse();

    let config = match loader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(LogFormat::Pretty);
            tracing::error!(service = "config", error = %e, "Failed to load configuration");
            return ExitCode::from(1);
        }
    };

    init_logging(config.observability.log_format);
    install_panic_hook();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.mode,
        port = config.listener.port,
        https = config.listener.https.enabled,
        "engine starting"
    );

    let factory = Arc::new(LocalQueueFactory::new(
        config.worker.clone(),
        Arc::new(LoggingHandler),
    ));
    let orchestrator = Orchestrator::new(config, EngineLauncher::new(factory));

    // A second signal while draining abandons the drain and exits 1.
    let first = async {
        wait_for_termination().await;
    };
    let second = async {
        wait_for_termination().await;
    };

    match orchestrator.run_until(first, second).await {
        Ok(report) => {
            tracing::info!(
                queues = report.queues.len(),
                clean = report.all_clean(),
                forced = report.forced,
                "engine stopped"
            );
            ExitCode::from(report.exit_code() as u8)
        }
        Err(e) => ExitCode::from(e.exit_code() as u8),
    }
}
