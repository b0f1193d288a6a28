use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use matinee_edge::{
    build_router,
    bridge::UpdateBridge,
    config::{Cli, Config},
    fleet,
    hub::SessionHub,
    state::AppState,
    storage::StateStore,
    telemetry,
};

const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let metrics = match telemetry::init() {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("telemetry init failed: {err:?}");
            std::process::exit(1);
        }
    };

    let config = Config::from(Cli::parse());
    info!(
        server_id = %config.server_id,
        server_url = %config.server_url,
        control_url = %config.control_url,
        capacity = config.capacity,
        "starting matinee edge node"
    );

    let store = match StateStore::new(&config.redis_url, config.session_ttl_seconds).await {
        Ok(store) => store,
        Err(err) => {
            error!("failed to connect to Redis: {err}");
            std::process::exit(1);
        }
    };
    let bus_client = match redis::Client::open(config.redis_url.clone()) {
        Ok(client) => client,
        Err(err) => {
            error!("invalid Redis URL: {err}");
            std::process::exit(1);
        }
    };

    let hub = SessionHub::new();
    let bridge = UpdateBridge::new(bus_client, hub.clone());
    let _reconciler = bridge.spawn_reconciler(RECONCILE_INTERVAL);

    let http = reqwest::Client::new();
    fleet::register(&http, &config).await;
    let _heartbeat = fleet::spawn_heartbeat(config.clone(), hub.clone());

    let state = AppState {
        config: config.clone(),
        store,
        hub,
        bridge,
        metrics,
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    info!("matinee edge listening on {addr}");
    let graceful = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = graceful.await {
        error!("server exited with error: {err}");
        std::process::exit(1);
    }
    info!("matinee edge shut down");
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
