//! opsml registry server binary

use opsml_server::{AppState, config::ServerConfig, create_router, error::Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "opsml_server=debug,opsml_registry=debug,tower_http=debug".to_string()
        }))
        .init();

    let config = ServerConfig::from_env()?;
    info!("Starting opsml server on {}", config.bind_address());

    let state = AppState::from_config(config.clone()).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
