//! Asset mutations: upload, delete and primary selection.
//!
//! Bytes are written to storage before the row exists and removed again if
//! the row cannot be inserted, so a row never points at content that was
//! never stored. Ordering and the primary flag are maintained inside a
//! transaction per mutation, and mutations of this service run one at a time
//! so two requests never renumber the same siblings from the same snapshot.

use std::sync::Arc;

use bytes::Bytes;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::convert::{check_glb, StepConverter};
use crate::db::entities::{asset_file, design, AssetKind};
use crate::db::now_secs;
use crate::error::{Result, ServerError};
use crate::resolver::ExistenceCache;
use crate::storage::{namespaces, StorageBackend};

const MODEL_EXTENSIONS: &[&str] = &["glb", "gltf"];
const STEP_EXTENSIONS: &[&str] = &["stp", "step"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Longest sanitised file name kept in a storage path
const MAX_STORED_NAME: usize = 120;

/// What was removed by [`AssetService::delete_asset`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedSummary {
    pub asset_id: i32,
    pub design_id: i32,
    pub deleted_file_name: String,
    pub kind: AssetKind,
    /// Sibling that became primary because the deleted asset was
    pub promoted_asset_id: Option<i32>,
}

pub struct AssetService {
    db: DatabaseConnection,
    storage: Arc<dyn StorageBackend>,
    existence: Arc<ExistenceCache>,
    converter: Arc<dyn StepConverter>,
    /// Held across each ordering transaction
    mutations: Mutex<()>,
}

impl AssetService {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageBackend>,
        existence: Arc<ExistenceCache>,
        converter: Arc<dyn StepConverter>,
    ) -> Self {
        Self {
            db,
            storage,
            existence,
            converter,
            mutations: Mutex::new(()),
        }
    }

    /// Store an uploaded file and record it against a design.
    ///
    /// STEP models are converted to GLB first; a failed conversion stores
    /// nothing.
    pub async fn add_asset(
        &self,
        design_id: i32,
        bytes: Bytes,
        kind: AssetKind,
        file_name: &str,
    ) -> Result<asset_file::Model> {
        design::Entity::find_by_id(design_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServerError::DesignNotFound(design_id.to_string()))?;

        if bytes.is_empty() {
            return Err(ServerError::InvalidRequest(format!("{} is empty", file_name)));
        }

        let extension = extension_of(file_name);
        let (bytes, stored_name) = match kind {
            AssetKind::Model if MODEL_EXTENSIONS.contains(&extension.as_str()) => {
                (bytes, sanitize_file_name(file_name))
            }
            AssetKind::Model if STEP_EXTENSIONS.contains(&extension.as_str()) => {
                let glb = self.converter.convert(bytes, file_name).await?;
                check_glb(&glb)?;
                (glb, with_extension(&sanitize_file_name(file_name), "glb"))
            }
            AssetKind::Model => {
                return Err(ServerError::UnsupportedFormat(format!(
                    "{} is not a 3D model (expected .glb, .gltf, .stp or .step)",
                    file_name
                )))
            }
            AssetKind::Image if IMAGE_EXTENSIONS.contains(&extension.as_str()) => {
                (bytes, sanitize_file_name(file_name))
            }
            AssetKind::Image => {
                return Err(ServerError::UnsupportedFormat(format!(
                    "{} is not a supported image (expected .png, .jpg, .jpeg, .gif or .webp)",
                    file_name
                )))
            }
        };

        let namespace = match kind {
            AssetKind::Model => namespaces::MODELS,
            AssetKind::Image => namespaces::IMAGES,
        };
        let relative_path = format!(
            "{}/{}/{}_{}",
            namespace,
            design_id,
            Uuid::new_v4().simple(),
            stored_name
        );

        let content_hash = sha256_hex(&bytes);
        let size = bytes.len() as i64;

        self.storage.put(&relative_path, bytes).await?;
        self.existence.invalidate(&relative_path);

        let row = asset_file::ActiveModel {
            design_id: Set(design_id),
            relative_path: Set(relative_path.clone()),
            kind: Set(kind.as_str().to_string()),
            original_file_name: Set(file_name.to_string()),
            content_hash: Set(content_hash),
            size: Set(size),
            created_at: Set(now_secs()),
            ..Default::default()
        };

        match self.insert_ordered(design_id, kind, row).await {
            Ok(asset) => {
                tracing::info!(
                    "Stored {} asset {} for design {} at {} (primary: {})",
                    kind,
                    asset.id,
                    design_id,
                    asset.relative_path,
                    asset.is_primary
                );
                Ok(asset)
            }
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&relative_path).await {
                    tracing::warn!("Failed to remove {} after insert error: {}", relative_path, cleanup);
                }
                self.existence.invalidate(&relative_path);
                Err(e)
            }
        }
    }

    async fn insert_ordered(
        &self,
        design_id: i32,
        kind: AssetKind,
        mut row: asset_file::ActiveModel,
    ) -> Result<asset_file::Model> {
        let _guard = self.mutations.lock().await;
        let txn = self.db.begin().await?;

        let siblings = asset_file::Entity::find()
            .filter(asset_file::Column::DesignId.eq(design_id))
            .filter(asset_file::Column::Kind.eq(kind.as_str()))
            .count(&txn)
            .await?;

        let is_primary = siblings == 0;
        row.sort_order = Set(siblings as i32);
        row.is_primary = Set(is_primary);
        let asset = row.insert(&txn).await?;

        let preview = (kind == AssetKind::Image && is_primary).then(|| asset.relative_path.clone());
        touch_design(&txn, design_id, preview).await?;

        txn.commit().await?;
        Ok(asset)
    }

    /// Delete an asset, its bytes, and close the gap it leaves
    pub async fn delete_asset(&self, asset_id: i32) -> Result<DeletedSummary> {
        let _guard = self.mutations.lock().await;
        let txn = self.db.begin().await?;

        let asset = asset_file::Entity::find_by_id(asset_id)
            .one(&txn)
            .await?
            .ok_or(ServerError::AssetNotFound(asset_id))?;
        let kind = asset
            .asset_kind()
            .ok_or_else(|| ServerError::Internal(format!("asset {} has kind '{}'", asset.id, asset.kind)))?;

        let deleted = asset_file::Entity::delete_by_id(asset.id).exec(&txn).await?;
        if deleted.rows_affected == 0 {
            return Err(ServerError::AssetNotFound(asset_id));
        }

        let siblings = asset_file::Entity::find()
            .filter(asset_file::Column::DesignId.eq(asset.design_id))
            .filter(asset_file::Column::Kind.eq(kind.as_str()))
            .order_by_asc(asset_file::Column::SortOrder)
            .order_by_desc(asset_file::Column::IsPrimary)
            .order_by_asc(asset_file::Column::Id)
            .all(&txn)
            .await?;

        let mut promoted_asset_id = None;
        let mut preview = None;
        for (index, sibling) in siblings.into_iter().enumerate() {
            let promote = index == 0 && asset.is_primary;
            if promote {
                promoted_asset_id = Some(sibling.id);
                preview = Some(sibling.relative_path.clone());
            }
            if sibling.sort_order == index as i32 && !promote {
                continue;
            }
            let mut active: asset_file::ActiveModel = sibling.into();
            active.sort_order = Set(index as i32);
            if promote {
                active.is_primary = Set(true);
            }
            active.update(&txn).await?;
        }

        if kind == AssetKind::Image {
            let current = design::Entity::find_by_id(asset.design_id).one(&txn).await?;
            let pointed_here = current
                .and_then(|d| d.preview_image_path)
                .map_or(false, |path| path == asset.relative_path);
            if pointed_here || asset.is_primary {
                set_preview(&txn, asset.design_id, preview).await?;
            }
        }

        // Another row may alias the same stored object
        let still_referenced = asset_file::Entity::find()
            .filter(asset_file::Column::RelativePath.eq(asset.relative_path.as_str()))
            .count(&txn)
            .await?
            > 0;

        txn.commit().await?;

        if still_referenced {
            tracing::debug!("Keeping {}, still referenced by another asset", asset.relative_path);
        } else if let Err(e) = self.storage.delete(&asset.relative_path).await {
            tracing::warn!("Failed to remove stored file {}: {}", asset.relative_path, e);
        }
        self.existence.invalidate(&asset.relative_path);

        tracing::info!(
            "Deleted {} asset {} ({}) from design {}",
            kind,
            asset.id,
            asset.original_file_name,
            asset.design_id
        );

        Ok(DeletedSummary {
            asset_id: asset.id,
            design_id: asset.design_id,
            deleted_file_name: asset.original_file_name,
            kind,
            promoted_asset_id,
        })
    }

    /// Make an asset the primary of its design and kind
    pub async fn set_primary(&self, asset_id: i32) -> Result<asset_file::Model> {
        let _guard = self.mutations.lock().await;
        let txn = self.db.begin().await?;

        let asset = asset_file::Entity::find_by_id(asset_id)
            .one(&txn)
            .await?
            .ok_or(ServerError::AssetNotFound(asset_id))?;

        asset_file::Entity::update_many()
            .col_expr(asset_file::Column::IsPrimary, Expr::value(false))
            .filter(asset_file::Column::DesignId.eq(asset.design_id))
            .filter(asset_file::Column::Kind.eq(asset.kind.as_str()))
            .exec(&txn)
            .await?;

        let mut active: asset_file::ActiveModel = asset.into();
        active.is_primary = Set(true);
        let asset = active.update(&txn).await?;

        let preview = (asset.asset_kind() == Some(AssetKind::Image)).then(|| asset.relative_path.clone());
        touch_design(&txn, asset.design_id, preview).await?;

        txn.commit().await?;
        Ok(asset)
    }

    /// Assets of a design in display order, optionally of one kind only
    pub async fn list_assets(&self, design_id: i32, kind: Option<AssetKind>) -> Result<Vec<asset_file::Model>> {
        let mut query = asset_file::Entity::find().filter(asset_file::Column::DesignId.eq(design_id));
        if let Some(kind) = kind {
            query = query.filter(asset_file::Column::Kind.eq(kind.as_str()));
        }
        Ok(query
            .order_by_asc(asset_file::Column::Kind)
            .order_by_asc(asset_file::Column::SortOrder)
            .order_by_desc(asset_file::Column::IsPrimary)
            .all(&self.db)
            .await?)
    }
}

/// Bump `updated_at`, and point the preview at `preview` when given
async fn touch_design<C: ConnectionTrait>(conn: &C, design_id: i32, preview: Option<String>) -> Result<()> {
    let mut update = design::Entity::update_many()
        .col_expr(design::Column::UpdatedAt, Expr::value(now_secs()))
        .filter(design::Column::Id.eq(design_id));
    if let Some(path) = preview {
        update = update.col_expr(design::Column::PreviewImagePath, Expr::value(path));
    }
    update.exec(conn).await?;
    Ok(())
}

async fn set_preview<C: ConnectionTrait>(conn: &C, design_id: i32, preview: Option<String>) -> Result<()> {
    design::Entity::update_many()
        .col_expr(design::Column::PreviewImagePath, Expr::value(preview))
        .col_expr(design::Column::UpdatedAt, Expr::value(now_secs()))
        .filter(design::Column::Id.eq(design_id))
        .exec(conn)
        .await?;
    Ok(())
}

fn extension_of(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

fn with_extension(file_name: &str, extension: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{}.{}", stem, extension),
        _ => format!("{}.{}", file_name, extension),
    }
}

/// Strip directories and anything outside `[A-Za-z0-9._-]`
fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return "asset".to_string();
    }

    // Keep the extension when truncating
    if cleaned.len() > MAX_STORED_NAME {
        let extension = extension_of(cleaned);
        let keep = MAX_STORED_NAME.saturating_sub(extension.len() + 1);
        return format!("{}.{}", &cleaned[..keep], extension);
    }
    cleaned.to_string()
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}
