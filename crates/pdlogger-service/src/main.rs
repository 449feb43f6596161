//! PD-Logger service - MQTT connectivity and HTTP log export.
//!
//! Run with: `cargo run -p pdlogger-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use pdlogger_service::mqtt::RumqttcTransport;
use pdlogger_service::{
    AppState, Config, ConnectivityManager, ManagerSettings, StatusLine, SystemClock, api,
};
use pdlogger_store::DirLogStorage;

/// PD-Logger service - MQTT connectivity and HTTP log export.
#[derive(Parser, Debug)]
#[command(name = "pdlogger-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Log segment directory (overrides config).
    #[arg(short, long)]
    log_dir: Option<PathBuf>,

    /// Disable the MQTT connectivity manager (API only mode).
    #[arg(long)]
    no_mqtt: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pdlogger_service=info".parse()?)
                .add_directive("pdlogger_store=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(log_dir) = args.log_dir {
        config.storage.log_dir = log_dir;
    }
    config.validate()?;

    info!("Opening log directory {:?}", config.storage.log_dir);
    let storage = Arc::new(DirLogStorage::open(&config.storage.log_dir)?);

    let identity = config.device.identity();
    info!("Device identity {}", identity.client_id());

    let (status_line, status_rx) = StatusLine::channel();
    let state = AppState::new(
        config.clone(),
        storage,
        identity.clone(),
        Arc::new(SystemClock),
        status_rx,
    );

    // Start the connectivity manager
    let manager = if config.mqtt.enabled && !args.no_mqtt {
        let manager = ConnectivityManager::new(
            RumqttcTransport::new(),
            state.broker_store.clone(),
            identity,
            ManagerSettings::from(&config.mqtt),
            state.subscribe_measurements(),
            status_line,
        );
        Some(manager.spawn(state.subscribe_shutdown()))
    } else {
        info!("MQTT connectivity manager disabled");
        None
    };

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    if let Some(handle) = manager {
        handle.await?;
    }
    info!("Shut down");

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    state.signal_shutdown();
}
