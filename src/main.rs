//! Cortex-Memory Server - knowledge management for AI agents.
//!
//! Entry point: configuration, state wiring, router assembly, and graceful
//! shutdown. All HTTP handlers live in src/handlers/ modules.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing::info;

use cortex_memory::{
    auth,
    config::ServerConfig,
    handlers::{self, ServiceState},
    metrics, middleware,
};

const STORE_FLUSH_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "cortex_memory=info,tower_http=warn");
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    print_banner();

    metrics::register_metrics().expect("Failed to register metrics");

    let server_config = ServerConfig::from_env();
    server_config.log();
    auth::log_security_status();

    let state = ServiceState::new(server_config.clone())?;
    let state_for_shutdown = Arc::clone(&state);

    // Configure rate limiting
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(server_config.rate_limit_per_second)
        .burst_size(server_config.rate_limit_burst)
        .finish()
        .expect("Failed to build governor rate limiter configuration");
    let governor_layer = GovernorLayer::new(governor_conf);

    let cors = server_config.cors.to_layer();

    let public_routes = handlers::build_public_routes(Arc::clone(&state));
    let protected_routes = handlers::build_protected_routes(Arc::clone(&state))
        .layer(axum::middleware::from_fn(auth::auth_middleware))
        .layer(governor_layer);

    let app = axum::Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::track_metrics))
                .layer(tower::limit::ConcurrencyLimitLayer::new(
                    server_config.max_concurrent_requests,
                ))
                .layer(cors),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    print_ready_message(addr);

    tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    run_shutdown_cleanup(state_for_shutdown).await;

    Ok(())
}

// =============================================================================
// Shutdown handling
// =============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn run_shutdown_cleanup(state: handlers::AppState) {
    info!("Flushing store before exit...");

    let store = state.store().clone();
    let flush = tokio::task::spawn_blocking(move || store.flush());
    match tokio::time::timeout(
        std::time::Duration::from_secs(STORE_FLUSH_TIMEOUT_SECS),
        flush,
    )
    .await
    {
        Ok(Ok(Ok(()))) => info!("Store flushed successfully"),
        Ok(Ok(Err(e))) => tracing::error!("Failed to flush store: {}", e),
        Ok(Err(e)) => tracing::error!("Flush task panicked: {}", e),
        Err(_) => tracing::error!("Store flush timed out after {}s", STORE_FLUSH_TIMEOUT_SECS),
    }

    info!("Server shutdown complete");
}

// =============================================================================
// Startup output
// =============================================================================

fn print_banner() {
    eprintln!();
    eprintln!(
        "  Cortex-Memory v{} - knowledge management for AI agents",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
}

fn print_ready_message(addr: SocketAddr) {
    eprintln!();
    eprintln!("  Server ready!");
    eprintln!("     HTTP:    http://{addr}");
    eprintln!("     Health:  http://{addr}/health");
    eprintln!("     Metrics: http://{addr}/metrics");
    eprintln!();
    eprintln!("  Press Ctrl+C to stop");
    eprintln!();
}
