//! API server entry point.

use api::{Backends, Config, LogFormat};
use tokio::signal;
use tokio_util::sync::CancellationToken;
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick storage and build the services
    let backends = match &config.database_url {
        Some(url) => {
            let pool = api::db::connect(&config, url)
                .await
                .expect("failed to connect to PostgreSQL");
            ledger::run_migrations(&pool)
                .await
                .expect("failed to run migrations");
            Backends::postgres(pool, config.channel_partitions)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            Backends::in_memory(config.channel_partitions)
        }
    };
    let services = api::build_services(backends, &config);

    // 4. Start the settlement consumer and the reconciler
    let shutdown = CancellationToken::new();
    let consumer = {
        let consumer = services.consumer;
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };
    let reconciler = {
        let reconciler = services.reconciler;
        let shutdown = shutdown.clone();
        tokio::spawn(async move { reconciler.run(shutdown).await })
    };

    // 5. Start server
    let app = api::create_app(services.state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, topic = %config.order_topic, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 6. Let in-flight settlement finish
    shutdown.cancel();
    if let Err(e) = consumer.await {
        tracing::error!(error = %e, "consumer task failed");
    }
    if let Err(e) = reconciler.await {
        tracing::error!(error = %e, "reconciler task failed");
    }

    tracing::info!("server shut down gracefully");
}
