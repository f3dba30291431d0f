pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    delete_asset, get_model, health, list_models, serve_media, set_primary, upload_asset, AppState,
};
pub use types::{DeleteResponse, ModelListResponse, ModelView, PrimaryResponse, UploadResponse};

use crate::config::MEDIA_PREFIX;

/// Build the application router
/// - Catalogue: /api/models, /api/models/:key
/// - Mutations: /api/models/:key/assets, /api/assets/:id
/// - Stored bytes: /media/*path
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/models/:key", get(get_model))
        .route("/api/models/:key/assets", post(upload_asset))
        .route("/api/assets/:id", delete(delete_asset))
        .route("/api/assets/:id/primary", put(set_primary))
        .route(&format!("{}/*path", MEDIA_PREFIX), get(serve_media))
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
