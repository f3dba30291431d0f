use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use sea_orm::DatabaseConnection;
use tokio_util::io::ReaderStream;

use super::types::{
    DeleteResponse, HealthResponse, ModelListResponse, ModelView, PrimaryResponse, UploadResponse,
};
use crate::assets::AssetService;
use crate::config::ServerConfig;
use crate::convert::{DisabledConverter, HttpStepConverter, StepConverter};
use crate::db::entities::AssetKind;
use crate::error::{Result, ServerError};
use crate::registry::{ModelTypeRegistry, Strictness};
use crate::resolver::{AssetResolver, ExistenceCache, PublicBase, RequestOrigin};
use crate::storage::{LocalStorage, StorageBackend, StorageError};

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    pub storage: Arc<dyn StorageBackend>,
    pub registry: ModelTypeRegistry,
    pub resolver: AssetResolver,
    pub assets: AssetService,
}

impl AppState {
    pub async fn new(config: ServerConfig, db: DatabaseConnection) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::open(config.media_root()).await?);
        tracing::info!("Serving media from {:?}", config.media_root());

        let converter: Arc<dyn StepConverter> = match &config.converter_url {
            Some(url) => {
                tracing::info!("STEP conversion via {}", url);
                Arc::new(HttpStepConverter::new(url.clone())?)
            }
            None => {
                tracing::info!("No STEP converter configured, STEP uploads will be rejected");
                Arc::new(DisabledConverter)
            }
        };

        Self::with_parts(config, db, storage, converter)
    }

    /// Assemble state from already-built collaborators
    pub fn with_parts(
        config: ServerConfig,
        db: DatabaseConnection,
        storage: Arc<dyn StorageBackend>,
        converter: Arc<dyn StepConverter>,
    ) -> Result<Self> {
        let base = PublicBase::parse(&config.public_base_url).map_err(ServerError::Internal)?;
        let existence = Arc::new(ExistenceCache::new(config.existence_ttl));

        Ok(Self {
            registry: ModelTypeRegistry::new(db.clone()),
            resolver: AssetResolver::new(db.clone(), storage.clone(), existence.clone(), base),
            assets: AssetService::new(db, storage.clone(), existence, converter),
            storage,
            config,
        })
    }

    async fn model_view(&self, key: &str, strictness: Strictness, origin: &RequestOrigin) -> Result<ModelView> {
        let design = self.registry.resolve(key, strictness).await?;
        let assets = self.resolver.resolve_assets(design.id, origin).await?;
        Ok(ModelView::new(&design.key, &design, assets))
    }
}

/// GET /api/models/:key
pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ModelView>> {
    let origin = RequestOrigin::from_headers(&headers);
    let view = state.model_view(&key, Strictness::Lenient, &origin).await?;
    tracing::debug!("Resolved {} to {} model url(s)", view.model_type, view.glb_urls.len());
    Ok(Json(view))
}

/// GET /api/models
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ModelListResponse>> {
    let origin = RequestOrigin::from_headers(&headers);
    let views = state
        .registry
        .known_keys()
        .map(|key| state.model_view(key, Strictness::Strict, &origin));
    let model_types = futures::future::try_join_all(views).await?;

    Ok(Json(ModelListResponse {
        success: true,
        model_types,
    }))
}

/// POST /api/models/:key/assets
///
/// Multipart body with a `file` part and an optional `kind` part
/// (`model` when absent).
pub async fn upload_asset(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let mut file: Option<(String, Bytes)> = None;
    let mut kind = AssetKind::Model;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ServerError::InvalidRequest("file part has no file name".into()))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
                file = Some((file_name, bytes));
            }
            Some("kind") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
                kind = text.parse().map_err(ServerError::InvalidRequest)?;
            }
            other => {
                tracing::debug!("Ignoring multipart field {:?}", other);
            }
        }
    }

    let (file_name, bytes) =
        file.ok_or_else(|| ServerError::InvalidRequest("missing 'file' part".into()))?;

    let design = state.registry.resolve(&key, Strictness::Lenient).await?;
    let asset = state.assets.add_asset(design.id, bytes, kind, &file_name).await?;

    let origin = RequestOrigin::from_headers(&headers);
    let url = state.resolver.public_base().media_url(&origin, &asset.relative_path);

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            success: true,
            asset_id: asset.id,
            url,
            kind,
            is_primary: asset.is_primary,
        }),
    ))
}

/// PUT /api/assets/:id/primary
pub async fn set_primary(
    State(state): State<Arc<AppState>>,
    Path(asset_id): Path<i32>,
) -> Result<Json<PrimaryResponse>> {
    let asset = state.assets.set_primary(asset_id).await?;
    Ok(Json(PrimaryResponse {
        success: true,
        asset_id: asset.id,
    }))
}

/// DELETE /api/assets/:id
pub async fn delete_asset(
    State(state): State<Arc<AppState>>,
    Path(asset_id): Path<i32>,
) -> Result<Json<DeleteResponse>> {
    let summary = state.assets.delete_asset(asset_id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        deleted_file_name: summary.deleted_file_name,
        promoted_asset_id: summary.promoted_asset_id,
    }))
}

/// GET /media/*path - stream a stored file
pub async fn serve_media(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Response> {
    let path = path.trim_start_matches('/');

    let size = match state.storage.size(path).await {
        Ok(size) => size,
        Err(StorageError::NotFound(_)) | Err(StorageError::InvalidKey(_)) => {
            tracing::warn!("Media file not found: {}", path);
            return Err(ServerError::MediaNotFound(path.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let reader = state.storage.get_stream(path).await?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(path))
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(response)
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Content type from file extension
fn content_type(path: &str) -> &'static str {
    let extension = path.rsplit('.').next().map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("glb") => "model/gltf-binary",
        Some("gltf") => "model/gltf+json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
