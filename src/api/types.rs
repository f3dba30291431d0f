//! Wire types for the JSON API.

use serde::{Deserialize, Serialize};

use crate::db::entities::{design, AssetKind};
use crate::resolver::ResolvedAssets;

// ============================================================================
// Response Types
// ============================================================================

/// GET /api/models/:key response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelView {
    pub success: bool,
    pub model_type: String,
    pub title: String,
    pub material_category: String,
    pub has_model: bool,
    pub glb_urls: Vec<String>,
    /// First entry of `glb_urls`, for single-model clients
    pub glb_url: Option<String>,
    pub preview_url: Option<String>,
    pub has_preview: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ModelView {
    pub fn new(key: &str, design: &design::Model, assets: ResolvedAssets) -> Self {
        let message = (!assets.has_model).then(|| {
            format!(
                "No GLB file uploaded for {}. Use the upload button to add a GLB file.",
                design.title
            )
        });

        Self {
            success: true,
            model_type: key.to_string(),
            title: design.title.clone(),
            material_category: design.material_category.clone(),
            has_model: assets.has_model,
            glb_url: assets.glb_urls.first().cloned(),
            glb_urls: assets.glb_urls,
            has_preview: assets.preview_url.is_some(),
            preview_url: assets.preview_url,
            message,
        }
    }
}

/// GET /api/models response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListResponse {
    pub success: bool,
    pub model_types: Vec<ModelView>,
}

/// POST /api/models/:key/assets response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub asset_id: i32,
    pub url: String,
    pub kind: AssetKind,
    pub is_primary: bool,
}

/// PUT /api/assets/:id/primary response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryResponse {
    pub success: bool,
    pub asset_id: i32,
}

/// DELETE /api/assets/:id response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub success: bool,
    pub deleted_file_name: String,
    pub promoted_asset_id: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
