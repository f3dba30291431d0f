use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chimney_assets::api::{self, AppState};
use chimney_assets::{db, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chimney_assets=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    // Initialize database
    let db = db::init_database(&config.database_path).await?;
    tracing::info!("Database initialized at {:?}", config.database_path);

    let addr = config.bind_addr;
    let state = Arc::new(AppState::new(config, db).await?);

    // Every catalogue key gets its design up front
    let designs = state.registry.ensure_all().await?;
    tracing::info!("{} model types ready", designs.len());

    let app = api::router(state.clone());

    tracing::info!("Chimney asset server starting on http://{}", addr);
    tracing::info!("Public base URL: {}", state.config.public_base_url);
    tracing::info!("");
    tracing::info!("API Endpoints:");
    tracing::info!("  GET    /api/models                - All model types");
    tracing::info!("  GET    /api/models/:key           - Resolve one model type");
    tracing::info!("  POST   /api/models/:key/assets    - Upload a GLB, STEP or image");
    tracing::info!("  PUT    /api/assets/:id/primary    - Make an asset primary");
    tracing::info!("  DELETE /api/assets/:id            - Delete an asset");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
