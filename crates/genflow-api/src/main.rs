//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use genflow_api::services::relay_job_events;
use genflow_api::{create_router, metrics, ApiConfig, AppState};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("genflow=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting genflow-api");

    // Load configuration
    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    // Create application state
    let state = match AppState::new(config.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create application state: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize metrics
    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);

    let metrics_handle = if metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics())
    } else {
        None
    };

    // One shutdown flag stops every background loop.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Job event relay: registry events -> websocket rooms. Subscribed
    // before any job can exist so no event is missed.
    let events = state.registry.subscribe();
    let relay = tokio::spawn(relay_job_events(
        Arc::clone(&state.registry),
        Arc::clone(&state.hub),
        events,
        shutdown_rx.clone(),
    ));

    // Status reconciler polling loop.
    let reconciler_task = {
        let reconciler = Arc::clone(&state.reconciler);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { reconciler.run(shutdown).await })
    };

    // Retention sweep for terminal job records.
    let registry_sweeper = {
        let registry = Arc::clone(&state.registry);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { registry.run_sweeper(shutdown).await })
    };

    // Idle-connection sweep for the notification hub.
    let hub_sweeper = {
        let hub = Arc::clone(&state.hub);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { hub.run(shutdown).await })
    };

    // TTL sweep for the submission cache.
    let cache_sweeper = {
        let submit = Arc::clone(&state.submit);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { submit.run_sweeper(shutdown).await })
    };

    // Create router
    let app = create_router(state.clone(), metrics_handle);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid bind address");

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap();

    // Drain background loops and drop every live socket.
    let _ = shutdown_tx.send(true);
    state.hub.shutdown_all().await;
    let _ = tokio::join!(
        relay,
        reconciler_task,
        registry_sweeper,
        hub_sweeper,
        cache_sweeper
    );

    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Received shutdown signal");
}
