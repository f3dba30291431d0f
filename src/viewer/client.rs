//! Catalogue client and the viewer facade built on it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use super::fetch::{AssetFetcher, HttpFetcher};
use super::loader::LoaderEngine;
use super::scene::{SceneComposer, SceneLoad};
use super::ViewerError;
use crate::api::ModelView;

const CATALOG_TIMEOUT_SECS: u64 = 30;

/// Reads model views from the catalogue API
pub struct CatalogClient {
    base_url: String,
    client: Client,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ViewerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(CATALOG_TIMEOUT_SECS))
            .build()
            .map_err(|e| ViewerError::Catalog(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub async fn fetch_model(&self, key: &str) -> Result<ModelView, ViewerError> {
        let url = format!("{}/api/models/{}", self.base_url, urlencoding::encode(key));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ViewerError::Catalog(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ViewerError::Catalog(format!("{} returned {}: {}", url, status, body.trim())));
        }

        response
            .json::<ModelView>()
            .await
            .map_err(|e| ViewerError::Catalog(format!("{}: invalid response: {}", url, e)))
    }
}

/// Which of a model type's files to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// Only the primary model, centred and framed
    Primary,
    /// Every model side by side
    All,
}

pub struct Viewer {
    catalog: CatalogClient,
    composer: SceneComposer,
}

impl Viewer {
    pub fn new(catalog: CatalogClient, composer: SceneComposer) -> Self {
        Self { catalog, composer }
    }

    /// HTTP fetcher and the default loader strategies against `base_url`
    pub fn connect(base_url: &str) -> Result<Self, ViewerError> {
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(HttpFetcher::new()?);
        let engine = Arc::new(LoaderEngine::with_default_strategies());
        Ok(Self::new(
            CatalogClient::new(base_url)?,
            SceneComposer::new(engine, fetcher),
        ))
    }

    pub fn composer(&self) -> &SceneComposer {
        &self.composer
    }

    /// Resolve `key` and load its models into the scene.
    ///
    /// The scene is claimed before the catalogue is asked, so a reply for an
    /// earlier selection that arrives late is discarded.
    pub async fn show(&self, key: &str, mode: ViewMode) -> Result<SceneLoad, ViewerError> {
        let previous = self.composer.current();
        let ticket = self.composer.begin_load(key, previous.as_ref());

        let view = self.catalog.fetch_model(key).await?;
        if !self.composer.is_current(&ticket) {
            tracing::debug!("Dropping catalogue reply for '{}', selection changed", key);
            return Err(ViewerError::Superseded {
                model_type: key.to_string(),
            });
        }
        if !view.has_model {
            return Err(ViewerError::NoModel(view.message.unwrap_or_else(|| {
                format!("No model uploaded for {}", view.title)
            })));
        }

        let urls: Vec<String> = match mode {
            ViewMode::Primary => view.glb_url.into_iter().collect(),
            ViewMode::All => view.glb_urls,
        };

        self.composer.finish_load(ticket, &urls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{self, AppState};
    use crate::config::ServerConfig;
    use crate::convert::DisabledConverter;
    use crate::db::entities::AssetKind;
    use crate::db::test_support::test_database;
    use crate::registry::Strictness;
    use crate::storage::{LocalStorage, StorageBackend};
    use crate::viewer::decode::minimal_glb;
    use bytes::Bytes;
    use tempfile::TempDir;

    struct Server {
        _db_dir: TempDir,
        _media: TempDir,
        state: Arc<AppState>,
        base_url: String,
    }

    async fn serve() -> Server {
        let (db_dir, db) = test_database().await;
        let media = TempDir::new().unwrap();
        let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(media.path().to_path_buf()));
        let config = ServerConfig::with_storage_path(media.path().to_path_buf());
        let state = Arc::new(AppState::with_parts(config, db, storage, Arc::new(DisabledConverter)).unwrap());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = api::router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Server {
            _db_dir: db_dir,
            _media: media,
            state,
            base_url: format!("http://{}", addr),
        }
    }

    async fn upload(server: &Server, key: &str, name: &str) {
        let design = server.state.registry.resolve(key, Strictness::Lenient).await.unwrap();
        server
            .state
            .assets
            .add_asset(design.id, Bytes::from(minimal_glb()), AssetKind::Model, name)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_show_without_uploads() {
        let server = serve().await;
        let viewer = Viewer::connect(&server.base_url).unwrap();

        let view = viewer.catalog.fetch_model("wall_mounted_skin").await.unwrap();
        assert!(!view.has_model);
        assert!(view.glb_urls.is_empty());
        assert_eq!(view.preview_url, None);

        let err = viewer.show("wall_mounted_skin", ViewMode::Primary).await.unwrap_err();
        assert!(matches!(err, ViewerError::NoModel(_)));
    }

    #[tokio::test]
    async fn test_show_primary_and_all() {
        let server = serve().await;
        upload(&server, "island_compensating", "body.glb").await;
        upload(&server, "island_compensating", "hood.glb").await;

        let viewer = Viewer::connect(&server.base_url).unwrap();

        let view = viewer.catalog.fetch_model("island_compensating").await.unwrap();
        assert_eq!(view.glb_urls.len(), 2);
        assert!(view.glb_urls[0].starts_with(&format!("{}/media/models/", server.base_url)));

        let single = viewer.show("island_compensating", ViewMode::Primary).await.unwrap();
        assert_eq!(single.report.loaded.len(), 1);
        assert!(single.report.loaded[0].ends_with("_body.glb"));
        assert!(single.framing.is_some());

        let all = viewer.show("island_compensating", ViewMode::All).await.unwrap();
        assert!(all.report.is_complete());
        assert_eq!(all.report.loaded.len(), 2);
        assert_eq!(all.disposed.objects, 1);
        assert_eq!(viewer.composer().ledger().live_meshes(), 2);
    }

    /// Catalogue stub whose reply for `type_a` is held back
    async fn serve_slow_catalog() -> String {
        use axum::extract::{Path, State};
        use axum::routing::get;
        use axum::{Json, Router};

        async fn model(Path(key): Path<String>, State(base): State<String>) -> Json<ModelView> {
            if key == "type_a" {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            }
            let url = format!("{}/files/{}.glb", base, key);
            Json(ModelView {
                success: true,
                model_type: key.clone(),
                title: key,
                material_category: "steel_304".into(),
                has_model: true,
                glb_urls: vec![url.clone()],
                glb_url: Some(url),
                preview_url: None,
                has_preview: false,
                message: None,
            })
        }

        async fn file() -> Vec<u8> {
            minimal_glb()
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new()
            .route("/api/models/:key", get(model))
            .route("/files/:name", get(file))
            .with_state(base.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    #[tokio::test]
    async fn test_late_catalog_reply_does_not_replace_newer_selection() {
        let base = serve_slow_catalog().await;
        let viewer = Arc::new(Viewer::connect(&base).unwrap());

        let slow = {
            let viewer = viewer.clone();
            tokio::spawn(async move { viewer.show("type_a", ViewMode::Primary).await })
        };
        while viewer.composer().current().map(|h| h.model_type) != Some("type_a".to_string()) {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let b = viewer.show("type_b", ViewMode::Primary).await.unwrap();
        assert_eq!(b.report.loaded, vec![format!("{}/files/type_b.glb", base)]);

        let a = slow.await.unwrap();
        assert!(matches!(a, Err(ViewerError::Superseded { ref model_type }) if model_type == "type_a"));

        assert_eq!(viewer.composer().current().unwrap().model_type, "type_b");
        assert_eq!(
            viewer.composer().scene_urls(),
            vec![format!("{}/files/type_b.glb", base)]
        );
        assert_eq!(viewer.composer().ledger().live_meshes(), 1);
    }

    #[tokio::test]
    async fn test_catalog_reports_bad_key() {
        let server = serve().await;
        let catalog = CatalogClient::new(&server.base_url).unwrap();

        let err = catalog.fetch_model("bad key!").await.unwrap_err();
        assert!(matches!(err, ViewerError::Catalog(ref msg) if msg.contains("400")));
    }
}
