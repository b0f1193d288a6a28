use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use matinee_control::{
    build_router,
    config::{Cli, Config},
    handlers::AppState,
    registry::EdgeRegistry,
    storage::Storage,
    telemetry,
};

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
        port = config.port,
        redis_url = %config.redis_url,
        session_ttl = config.session_ttl_seconds,
        "starting matinee control node"
    );

    let storage = match Storage::new(&config.redis_url, config.session_ttl_seconds).await {
        Ok(storage) => storage,
        Err(err) => {
            error!("failed to connect to Redis: {err}");
            std::process::exit(1);
        }
    };

    let registry = EdgeRegistry::new();
    let _sweeper = registry.spawn_sweeper(config.sweep_interval, config.evict_after);

    let state = AppState {
        storage: Arc::new(storage),
        registry,
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

    info!("matinee control listening on {addr}");
    if let Err(err) = axum::serve(listener, app).await {
        error!("server exited with error: {err}");
        std::process::exit(1);
    }
}
