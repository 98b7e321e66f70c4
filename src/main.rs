use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cache;
mod config;
mod db;
mod error;
mod queue;
mod routes;
mod senders;
mod services;
mod validation;

use config::Config;
use db::repository::PostgresNotificationStore;
use queue::{RabbitPublisher, RetryStrategy};
use services::{init, notifier::NotifierService, workers::WorkerManager};
use validation::Validator;

pub struct AppState {
    pub config: Config,
    pub service: Arc<NotifierService>,
    pub validator: Validator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "delayed_notifier=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Delayed Notifier");

    // Initialize shared clients
    let pool = init::init_db(&config).await?;
    let cache = init::init_cache(&config).await?;
    let (queue_connection, publish_channel, consume_channel) = init::init_queue(&config).await?;
    let registry = init::init_senders(&config).await;

    let store = Arc::new(PostgresNotificationStore::new(pool.clone()));
    let publisher = Arc::new(RabbitPublisher::new(
        publish_channel,
        config.queue.exchange.clone(),
        RetryStrategy::publisher(&config.retry),
    ));

    let service = Arc::new(NotifierService::new(
        store,
        cache,
        publisher,
        Arc::new(registry),
        config.cache.notification_ttl(),
        config.retry.max_retries,
    ));

    // Spawn the queue consumer and worker pool
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let mut workers = WorkerManager::new(
        consume_channel,
        &config.queue,
        &config.worker,
        RetryStrategy::consumer(&config.retry),
        service.clone(),
        shutdown_tx,
    );
    workers.start().await?;

    let state = Arc::new(AppState {
        config: config.clone(),
        service,
        validator: Validator::new(),
    });

    // Build router
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api/v1", routes::notify::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, gracefully shutting down");

    // The HTTP server no longer accepts submissions; drain the workers,
    // then close clients in reverse construction order.
    workers.stop().await;

    if let Err(e) = queue_connection.close(200, "shutdown").await {
        tracing::warn!("Failed to close broker connection: {}", e);
    }
    pool.close().await;

    tracing::info!("Application stopped gracefully");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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
}
