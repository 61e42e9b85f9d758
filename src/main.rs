//! CLI for workq
//!
//! Subcommands:
//! - `serve`: open the store and run the HTTP broker until Ctrl-C

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use workq::broker::Broker;
use workq::config::{Settings, load_config_from};
use workq::persistence::SledStore;
use workq::transport::{AppState, start_http_server};
use workq::utils::logging;

#[derive(Parser)]
#[command(name = "workq", version, about = "Topic work-queue broker over streaming HTTP")]
enum Command {
    /// Run the broker
    Serve {
        /// Configuration file, instead of config/default
        #[arg(long)]
        config: Option<String>,
        /// Address to bind, overrides the configured host
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overrides the configured port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    // .env is optional
    let _ = dotenvy::dotenv();

    let Command::Serve { config, host, port } = Command::parse();

    let mut settings = match load_config_from(config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }

    logging::init(&settings.logging.level);

    if let Err(e) = run_server(settings).await {
        error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = SledStore::open(&settings.storage.path, settings.storage.flush_on_insert)?;
    info!(path = %settings.storage.path, "opened store");

    let broker = Arc::new(Broker::new(Arc::new(store)));
    let shutdown = CancellationToken::new();
    let state = AppState::new(broker.clone(), &settings.server, shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received. Exiting gracefully.");
        signal.cancel();
    });

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    start_http_server(&addr, state).await?;

    if let Err(e) = broker.shutdown() {
        error!("Failed to close store: {}", e);
    }
    Ok(())
}
