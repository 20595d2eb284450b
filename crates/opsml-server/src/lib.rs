//! opsml HTTP API Server
//!
//! Exposes the registry tables and artifact storage over HTTP so that
//! clients configured with an `http://` tracking uri can register, list and
//! load cards remotely.

use axum::{Router, extract::DefaultBodyLimit, response::Json, routing::get};
use opsml_registry::CardRegistries;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub mod config;
pub mod error;
pub mod routes;

use config::ServerConfig;
use error::{ApiError, Result};

/// Main application state
#[derive(Clone)]
pub struct AppState {
    pub registries: CardRegistries,
    pub config: ServerConfig,
}

impl AppState {
    /// Connect the registry tables and artifact storage described by `config`
    pub async fn from_config(config: ServerConfig) -> Result<Self> {
        if config.registry.is_client_mode() {
            return Err(ApiError::Config(
                "The server cannot proxy to another registry server".to_string(),
            ));
        }

        let registries = CardRegistries::connect(&config.registry).await?;
        info!(
            "Registry connected to {} with artifacts in {}",
            config.registry.tracking_uri, config.registry.storage_uri
        );

        Ok(Self { registries, config })
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(health_check))
        .nest("/opsml", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// API routes
fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/cards", routes::cards::router())
        .nest("/files", routes::files::router())
}

/// Health check endpoint
async fn health_check() -> Result<Json<Value>> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "opsml-server",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": time::OffsetDateTime::now_utc()
    })))
}
