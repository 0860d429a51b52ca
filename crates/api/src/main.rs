use std::net::SocketAddr;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use regserver_api::config::ServerConfig;
use regserver_api::router::build_app_router;
use regserver_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "regserver_api=debug,regserver_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        jobs_data_location = %config.jobs_data_location.display(),
        "Loaded server configuration"
    );

    // --- Executors ---
    let state = AppState::from_config(config.clone());
    for executor in [&state.registration, &state.transform] {
        executor
            .init()
            .await
            .expect("Failed to create job scratch directory");
        tracing::info!(
            kind = %executor.kind(),
            root = %executor.staging().root().display(),
            max_concurrent = executor.limiter().max_concurrent(),
            "Job executor ready"
        );
    }

    // --- Router ---
    let app = build_app_router(state.clone(), &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown drain ---
    tracing::info!("Server stopped accepting connections, waiting for running jobs");
    let drained = tokio::time::timeout(
        Duration::from_secs(config.shutdown_timeout_secs),
        wait_for_idle(&state),
    )
    .await;
    match drained {
        Ok(()) => tracing::info!("Graceful shutdown complete"),
        Err(_) => tracing::warn!(
            registration = state.registration.limiter().in_flight(),
            transform = state.transform.limiter().in_flight(),
            "Shutdown timeout elapsed with jobs still running"
        ),
    }
}

/// Resolve once no job of either kind holds a slot.
async fn wait_for_idle(state: &AppState) {
    while state.registration.limiter().in_flight() > 0 || state.transform.limiter().in_flight() > 0
    {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
