// =============================================================================
// nexus-perp — Main Entry Point
// =============================================================================
//
// One binary, no required arguments: every flag below overrides a default
// that otherwise comes from `config::EngineConfig` or its own built-in
// fallback. Shutdown is Ctrl+C driven, same as the teacher's `main.rs`.
// =============================================================================

mod api;
mod bootstrap;
mod config;
mod de;
mod event;
mod indicators;
mod market_data;
mod pm;
mod st;
mod ta;
mod tr;
mod types;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::Bootstrap;
use crate::config::EngineConfig;

#[derive(Parser, Debug)]
#[command(name = "nexus-perp", about = "Multi-account perpetual-futures trading engine")]
struct Cli {
    /// Directory containing pm_config.json and strategies/.
    #[arg(long)]
    config_dir: Option<String>,

    /// Path to the SQLite event store file.
    #[arg(long)]
    db_path: Option<String>,

    /// "pretty" (default, human-readable) or "json" (structured, for log
    /// aggregation).
    #[arg(long, default_value = "pretty")]
    log_format: String,

    /// Address the read-only dashboard API binds to.
    #[arg(long, default_value = "0.0.0.0:3001")]
    bind_addr: String,

    /// Path to the engine's own tunables file. Missing file falls back to
    /// `EngineConfig::default()` with a warning, never a hard error.
    #[arg(long, default_value = "engine_config.json")]
    engine_config_path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    init_tracing(&cli.log_format);

    info!("nexus-perp starting up");

    let mut config = EngineConfig::load(&cli.engine_config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load engine config, using defaults");
        EngineConfig::default()
    });
    if let Some(dir) = cli.config_dir {
        config.config_dir = dir;
    }
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }

    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let bootstrap = match Bootstrap::new(&config).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to initialise engine — exiting");
            std::process::exit(1);
        }
    };

    if let Err(e) = bootstrap.run(&config, &cli.bind_addr).await {
        error!(error = %e, "engine exited with error");
        std::process::exit(1);
    }

    info!("nexus-perp shut down complete");
    Ok(())
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
