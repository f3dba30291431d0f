//! Model type registry.
//!
//! Maps a stable catalogue key (`wall_mounted_skin`, `island_compensating`, ...)
//! to its display metadata and to the single [`design`] row that owns the
//! key's uploaded assets. Designs are created on first resolution through an
//! insert that tolerates a unique-key conflict, so concurrent first requests
//! for the same key converge on one row.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::db::entities::{design, model_type};
use crate::db::now_secs;
use crate::error::{Result, ServerError};

/// Longest accepted key
const MAX_KEY_LEN: usize = 64;

const STEEL_202: &str = "Stainless Steel 202";
const STEEL_304: &str = "Stainless Steel 304";

/// A catalogue entry known at build time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelTypeSpec {
    pub key: &'static str,
    pub title: &'static str,
    pub material: &'static str,
}

/// The chimney catalogue. Order is the listing order.
pub const MODEL_TYPES: &[ModelTypeSpec] = &[
    ModelTypeSpec { key: "wall_mounted_skin", title: "Wall Mounted Single Skin", material: STEEL_202 },
    ModelTypeSpec { key: "wall_mounted_single_plenum", title: "Wall Mounted Single Plenum", material: STEEL_202 },
    ModelTypeSpec { key: "wall_mounted_double_skin", title: "Wall Mounted Double Skin", material: STEEL_304 },
    ModelTypeSpec { key: "wall_mounted_compensating", title: "Wall Mounted Compensating", material: STEEL_304 },
    ModelTypeSpec { key: "uv_compensating", title: "UV Compensating", material: STEEL_304 },
    ModelTypeSpec { key: "island_single_skin", title: "Island Single Skin", material: STEEL_202 },
    ModelTypeSpec { key: "island_double_skin", title: "Island Double Skin", material: STEEL_304 },
    ModelTypeSpec { key: "island_compensating", title: "Island Compensating", material: STEEL_304 },
];

static BY_KEY: Lazy<HashMap<&'static str, &'static ModelTypeSpec>> =
    Lazy::new(|| MODEL_TYPES.iter().map(|spec| (spec.key, spec)).collect());

/// Whether unknown keys may be auto-created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Any syntactically valid key gets a design
    Lenient,
    /// Only keys in [`MODEL_TYPES`]; used by bulk listing
    Strict,
}

pub fn lookup(key: &str) -> Option<&'static ModelTypeSpec> {
    BY_KEY.get(key).copied()
}

/// Trim, lower-case and check the key alphabet
pub fn normalize_key(raw: &str) -> Result<String> {
    let key = raw.trim().to_ascii_lowercase();
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(ServerError::InvalidKey(raw.to_string()));
    }
    Ok(key)
}

/// Catalogue title, or the key title-cased (`foo_bar` -> `Foo Bar`)
pub fn default_title(key: &str) -> String {
    if let Some(spec) = lookup(key) {
        return spec.title.to_string();
    }
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Main assemblies use sheet 304, single sections sheet 202
pub fn infer_material(key: &str) -> &'static str {
    if let Some(spec) = lookup(key) {
        return spec.material;
    }
    if key.contains("double_skin") || key.contains("compensating") {
        STEEL_304
    } else {
        STEEL_202
    }
}

pub struct ModelTypeRegistry {
    db: DatabaseConnection,
}

impl ModelTypeRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Catalogue keys in listing order
    pub fn known_keys(&self) -> impl Iterator<Item = &'static str> {
        MODEL_TYPES.iter().map(|spec| spec.key)
    }

    /// Look up the design for a key without creating it
    pub async fn find(&self, key: &str) -> Result<Option<design::Model>> {
        let key = normalize_key(key)?;
        Ok(design::Entity::find()
            .filter(design::Column::Key.eq(key))
            .one(&self.db)
            .await?)
    }

    /// Catalogue entry for a key, if one has been recorded
    pub async fn entry(&self, key: &str) -> Result<Option<model_type::Model>> {
        let key = normalize_key(key)?;
        Ok(model_type::Entity::find_by_id(key).one(&self.db).await?)
    }

    /// Return the design for `key`, creating it on first use.
    pub async fn resolve(&self, key: &str, strictness: Strictness) -> Result<design::Model> {
        let key = normalize_key(key)?;
        if strictness == Strictness::Strict && lookup(&key).is_none() {
            return Err(ServerError::UnknownKind(key));
        }

        if let Some(existing) = self.find(&key).await? {
            return Ok(existing);
        }

        let title = default_title(&key);
        let material = infer_material(&key).to_string();
        let now = now_secs();

        let row = design::ActiveModel {
            key: Set(key.clone()),
            title: Set(title.clone()),
            description: Set(Some(format!("3D model for {} (model_type: {})", title, key))),
            material_category: Set(material.clone()),
            preview_image_path: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let inserted = design::Entity::insert(row)
            .on_conflict(
                OnConflict::column(design::Column::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        if inserted == 0 {
            tracing::debug!("Design for '{}' created concurrently, re-reading", key);
        } else {
            tracing::info!("Created design for model type '{}'", key);
        }

        let design = self.find(&key).await?.ok_or_else(|| {
            ServerError::Internal(format!("design for '{}' vanished after insert", key))
        })?;

        self.link_entry(&key, &title, &material, design.id).await?;
        Ok(design)
    }

    /// Make sure every catalogue key has a design
    pub async fn ensure_all(&self) -> Result<Vec<design::Model>> {
        let mut designs = Vec::with_capacity(MODEL_TYPES.len());
        for key in self.known_keys() {
            designs.push(self.resolve(key, Strictness::Strict).await?);
        }
        Ok(designs)
    }

    async fn link_entry(&self, key: &str, title: &str, material: &str, design_id: i32) -> Result<()> {
        let entry = model_type::ActiveModel {
            key: Set(key.to_string()),
            display_title: Set(title.to_string()),
            material_category: Set(material.to_string()),
            design_id: Set(Some(design_id)),
        };

        model_type::Entity::insert(entry)
            .on_conflict(
                OnConflict::column(model_type::Column::Key)
                    .update_column(model_type::Column::DesignId)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }
}
