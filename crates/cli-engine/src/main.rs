//! CLI entry point for the pixelmill daemon
//!
//! Parses command line arguments, wires the engine to its file-backed
//! collaborators, and runs the status server with the background loops.

use clap::Parser;
use pixelmill_engine::{
    http_client_factory, run_startup_checks, run_status_server, Config, Engine,
    FileConfigurationProvider, FileImageStore, JsonFileJobStore, ModelCapabilityCatalog,
    TemplatePromptBuilder,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// pixelmill - AI image variant orchestration daemon
#[derive(Parser, Debug)]
#[command(name = "pixelmill")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory where job state files are stored
    #[arg(long, default_value = "/var/lib/pixelmill/jobs")]
    state_dir: PathBuf,

    /// Directory where images and variant rows are stored
    #[arg(long, default_value = "/var/lib/pixelmill/data")]
    data_dir: PathBuf,

    /// Skip backend connectivity checks at startup
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

/// Queued jobs re-dispatched when the daemon comes back up.
const BOOT_RESUME_BATCH: usize = 64;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    info!(config = %args.config.display(), "pixelmill starting");

    // A missing config file is a first-run condition, not a fatal error:
    // the daemon comes up with defaults and no enabled backends.
    let config = if args.config.exists() {
        match Config::load(&args.config) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "failed to load configuration");
                return ExitCode::FAILURE;
            }
        }
    } else {
        warn!(path = %args.config.display(), "no configuration file found, using defaults");
        Config::default()
    };

    let store = match JsonFileJobStore::open(&args.state_dir).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to open job state directory");
            return ExitCode::FAILURE;
        }
    };

    let images = match FileImageStore::open(&args.data_dir).await {
        Ok(images) => Arc::new(images),
        Err(e) => {
            error!(error = %e, "failed to open image data directory");
            return ExitCode::FAILURE;
        }
    };

    let catalog = ModelCapabilityCatalog::default();
    let engine = Engine::new(
        &config,
        catalog.clone(),
        Arc::new(FileConfigurationProvider::new(&args.config)),
        http_client_factory(catalog),
        store,
        images,
        Arc::new(TemplatePromptBuilder),
    );

    if args.skip_checks {
        warn!("skipping startup connectivity checks (--skip-checks enabled)");
    }
    if let Err(e) = run_startup_checks(&config, engine.registry(), args.skip_checks).await {
        error!(error = %e, "startup checks failed");
        return ExitCode::FAILURE;
    }

    let bind: SocketAddr = match config.server.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(bind = %config.server.bind, error = %e, "invalid bind address");
            return ExitCode::FAILURE;
        }
    };

    let _updater = engine.start_metrics_updater();
    let _recovery = engine.clone().start_stalled_recovery();

    let resumed = engine.clone().resume_retryable(BOOT_RESUME_BATCH).await;
    if resumed > 0 {
        info!(count = resumed, "re-dispatched queued jobs from a previous run");
    }

    info!(%bind, "status server listening");
    if let Err(e) = run_status_server(engine, bind).await {
        error!(error = %e, "status server error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
