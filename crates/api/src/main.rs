//! API server entry point.

use api::config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use state_store::{InMemoryStateStore, PostgresStateStore, StateStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<S: StateStore + 'static>(store: S, config: Config, metrics_handle: PrometheusHandle) {
    // Wire the saga host and route reminder ticks to its workers
    let (state, ticks) = api::create_default_state(store, &config);
    let router = state.host.spawn_tick_router(ticks);

    // Resume sagas interrupted by the previous shutdown
    let resumed = state
        .host
        .recover_in_flight()
        .await
        .expect("startup recovery failed");
    tracing::info!(resumed, "startup recovery complete");

    let app = api::create_app(state.clone(), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    state.host.shutdown().await;
    router.abort();
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the state store and serve
    match config.database_url.clone() {
        Some(database_url) => {
            let store = PostgresStateStore::connect(&database_url, 10)
                .await
                .expect("failed to connect to database");
            store.run_migrations().await.expect("migrations failed");
            tracing::info!("using PostgreSQL state store");
            serve(store, config, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory state store");
            serve(InMemoryStateStore::new(), config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
