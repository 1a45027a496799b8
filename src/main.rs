mod auth;
mod config;
mod middleware;

mod error;
mod models;
mod routes;
mod services;
mod store;

use std::sync::Arc;

use crate::{
    config::{Config, StorageBackend},
    models::AppState,
    store::{memory::MemoryStore, pg::PgStore, Store},
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use anyhow::Context;
use axum::http::header;
use tracing_subscriber::EnvFilter;

async fn build_store(cfg: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match cfg.storage {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; data is lost on shutdown");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for postgres storage")?;
            let store = PgStore::connect(url, cfg.db_max_connections).await?;
            if cfg.run_migrations {
                store.migrate().await?;
                tracing::info!("database migrations applied");
            }
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let store = build_store(&cfg).await?;

    if cfg.api_token_sha256.is_none() {
        tracing::warn!("API_TOKEN_SHA256 is not set; the API accepts unauthenticated requests");
    }

    let state = AppState {
        store,
        api_token_hash: cfg.api_token_sha256.clone(),
        default_page_limit: cfg.default_page_limit,
        default_tax_rate: cfg.default_tax_rate,
    };

    // Browser front ends call the API from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
