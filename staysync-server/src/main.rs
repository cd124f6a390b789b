mod auth;
mod routes;
mod state;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use staysync_core::config::Settings;
use staysync_core::worker::{FeedWorker, HttpFetcher};
use staysync_core::Engine;

use crate::auth::AuthRegistry;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("staysync_server=info,staysync_core=info")),
        )
        .init();

    let settings = Settings::load(None)?;
    let store = settings.open_store()?;
    let engine = Engine::new(Arc::clone(&store));

    let registry = Arc::new(AuthRegistry::new());
    registry.bootstrap_admin(&settings.default_admin_email, &settings.default_admin_password);

    let fetcher = Arc::new(HttpFetcher::new(settings.fetch_timeout()));
    let worker = Arc::new(FeedWorker::new(store, fetcher, settings.sync_interval()));
    worker.start();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::listings::router())
        .merge(routes::conflicts::router())
        .merge(routes::feeds::router())
        .merge(routes::auth::router())
        .with_state(AppState::new(engine, registry))
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("staysync-server listening on http://{}", settings.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
