mod config;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use snow_ai::{CompletionClient, CompletionConfig, ImageConfig, ImageGenerator};
use snow_api::auth::JwtKeys;
use snow_api::storage::ObjectStore;
use snow_api::AppStateInner;
use snow_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snowblog=debug,snow_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    let completer = CompletionClient::new(CompletionConfig::from_env()?)?;
    let storage = ObjectStore::open(&config.upload_dir, &config.public_url).await?;

    let mut state = AppStateInner::new(db, JwtKeys::new(&config.jwt_secret), completer, storage);
    match ImageConfig::from_env() {
        Some(image_config) => state = state.with_images(ImageGenerator::new(image_config)?),
        None => warn!("FAL_KEY not set, image generation disabled"),
    }

    let app = Router::new()
        .route("/health", get(health))
        .nest_service("/uploads", ServeDir::new(&config.upload_dir))
        .merge(snow_api::router(Arc::new(state)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Snowblog listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
