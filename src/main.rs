//! MoviePolls binary entry point

use std::path::PathBuf;

use clap::Parser;
use moviepolls::{AppState, config, logging};

/// Command-line flags; they override the loaded configuration.
#[derive(Debug, Parser)]
#[command(name = "moviepolls", version, about)]
struct Args {
    /// Also append log lines to this file
    #[arg(long, env = "MOVIEPOLLS_LOG")]
    log: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Bind address, e.g. 0.0.0.0:8090 or :8090
    #[arg(long)]
    addr: Option<String>,
}

/// Accept Go-style `:port` as shorthand for all interfaces.
fn bind_address(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    }
}

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment, apply flags
/// 2. Initialize logging and metrics
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = config::AppConfig::load()?;
    if args.debug {
        config.logging.level = "debug".to_string();
    }
    if let Some(log) = args.log {
        config.logging.file = Some(log);
    }

    // 2. Initialize logging and metrics
    logging::init(config.logging.level()?, config.logging.file.as_deref())?;
    tracing::info!("Starting MoviePolls...");
    moviepolls::metrics::init_metrics();

    let addr = args
        .addr
        .as_deref()
        .map(bind_address)
        .unwrap_or_else(|| config.server.bind_address());
    tracing::info!(
        backend = %config.database.backend,
        path = %config.database.path.display(),
        "Configuration loaded"
    );

    // 3. Initialize application state
    let state = AppState::new(config).await?;

    // 4. Build Axum router
    let app = moviepolls::build_router(state);

    // 5. Start HTTP server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
