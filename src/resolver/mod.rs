//! Asset resolution.
//!
//! Turns a design into the list of model URLs a viewer can actually fetch:
//! rows are read in display order, files missing from storage are skipped
//! (and logged, since orphaned rows are an expected steady state), URLs are
//! built against the caller's reachable host and duplicates are collapsed.

mod existence;
mod url;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;

use crate::db::entities::{asset_file, design, AssetKind};
use crate::error::{Result, ServerError};
use crate::storage::StorageBackend;

pub use existence::ExistenceCache;
pub use url::{encode_path, PublicBase, RequestOrigin};

/// Suffix of previews rendered next to a GLB (`hood.glb` -> `hood_preview.png`)
const DERIVED_PREVIEW_SUFFIX: &str = "_preview.png";

/// Verified URLs for one design
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAssets {
    pub glb_urls: Vec<String>,
    pub preview_url: Option<String>,
    pub has_model: bool,
}

pub struct AssetResolver {
    db: DatabaseConnection,
    storage: Arc<dyn StorageBackend>,
    existence: Arc<ExistenceCache>,
    base: PublicBase,
}

impl AssetResolver {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageBackend>,
        existence: Arc<ExistenceCache>,
        base: PublicBase,
    ) -> Self {
        Self {
            db,
            storage,
            existence,
            base,
        }
    }

    pub fn public_base(&self) -> &PublicBase {
        &self.base
    }

    /// Resolve the model URLs and preview image of a design.
    ///
    /// Never fails because of a missing file; only an unknown design is an
    /// error.
    pub async fn resolve_assets(&self, design_id: i32, origin: &RequestOrigin) -> Result<ResolvedAssets> {
        let design = design::Entity::find_by_id(design_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServerError::DesignNotFound(design_id.to_string()))?;

        let models = self.ordered_assets(design.id, AssetKind::Model).await?;

        let mut seen = HashSet::new();
        let mut glb_urls = Vec::new();
        let mut first_model_path = None;

        let present = join_all(
            models
                .iter()
                .map(|asset| self.present(asset.design_id, &asset.relative_path)),
        )
        .await;

        for (asset, exists) in models.iter().zip(present) {
            if !exists {
                continue;
            }
            let url = self.base.media_url(origin, &asset.relative_path);
            if seen.insert(url.clone()) {
                first_model_path.get_or_insert_with(|| asset.relative_path.clone());
                glb_urls.push(url);
            } else {
                tracing::debug!("Skipping duplicate asset url {} (asset {})", url, asset.id);
            }
        }

        let preview_url = self
            .resolve_preview(&design, first_model_path.as_deref())
            .await?
            .map(|path| self.base.media_url(origin, &path));

        let has_model = !glb_urls.is_empty();
        Ok(ResolvedAssets {
            glb_urls,
            preview_url,
            has_model,
        })
    }

    /// Assets of one kind ordered by `sort_order`, primary first on ties
    pub async fn ordered_assets(&self, design_id: i32, kind: AssetKind) -> Result<Vec<asset_file::Model>> {
        Ok(asset_file::Entity::find()
            .filter(asset_file::Column::DesignId.eq(design_id))
            .filter(asset_file::Column::Kind.eq(kind.as_str()))
            .order_by_asc(asset_file::Column::SortOrder)
            .order_by_desc(asset_file::Column::IsPrimary)
            .order_by_asc(asset_file::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn present(&self, design_id: i32, relative_path: &str) -> bool {
        let exists = self.existence.exists(&self.storage, relative_path).await;
        if !exists {
            tracing::warn!(
                "Asset file missing from storage for design {}: {}",
                design_id,
                relative_path
            );
        }
        exists
    }

    /// Explicit preview, then the primary image asset, then a preview
    /// rendered next to the first surviving model.
    async fn resolve_preview(
        &self,
        design: &design::Model,
        first_model_path: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(path) = design.preview_image_path.as_deref() {
            if self.present(design.id, path).await {
                return Ok(Some(path.to_string()));
            }
        }

        let mut images = self.ordered_assets(design.id, AssetKind::Image).await?;
        images.sort_by_key(|image| !image.is_primary);
        for image in images {
            if Some(image.relative_path.as_str()) == design.preview_image_path.as_deref() {
                continue;
            }
            if self.present(design.id, &image.relative_path).await {
                return Ok(Some(image.relative_path));
            }
        }

        if let Some(model_path) = first_model_path {
            if let Some(derived) = derived_preview_path(model_path) {
                if self.existence.exists(&self.storage, &derived).await {
                    return Ok(Some(derived));
                }
            }
        }

        Ok(None)
    }
}

/// `models/1/hood.glb` -> `models/1/hood_preview.png`
fn derived_preview_path(model_path: &str) -> Option<String> {
    let (dir, file) = match model_path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, model_path),
    };
    let stem = file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file);
    if stem.is_empty() {
        return None;
    }
    let name = format!("{}{}", stem, DERIVED_PREVIEW_SUFFIX);
    Some(match dir {
        Some(dir) => format!("{}/{}", dir, name),
        None => name,
    })
}
