use anyhow::Result;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use review_system::{
    Config, ReviewService, Scheduler,
    api::{AppState, create_router},
    store::CardStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let _guard = setup_logging()?;

    let config = Config::from_env()?;
    config.validate()?;

    info!("Starting review scheduling server...");

    let store = CardStore::new(&config.database.url).await?;
    info!("Card store initialized successfully");

    let scheduler = Scheduler::new(config.scheduler.to_scheduler_config());
    let review_service = ReviewService::new(store, scheduler);

    let state = AppState { review_service };

    let app = create_router(state)
        // CORS middleware
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn setup_logging() -> Result<WorkerGuard> {
    use std::fs;
    use tracing_subscriber::fmt;

    // Create logs directory if it doesn't exist
    fs::create_dir_all("logs").unwrap_or_else(|e| {
        eprintln!("Warning: Could not create logs directory: {}", e);
    });

    let default_log_level = "info,review_system=debug";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_log_level));

    // Daily-rotated file output alongside the console.
    let file_appender = tracing_appender::rolling::daily("logs", "review-system.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(non_blocking_file);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized - writing to logs/review-system.log with daily rotation");

    Ok(guard)
}
