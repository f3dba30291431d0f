//! Asset file entity: one stored binary (3D model or preview image)

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "asset_files")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub design_id: i32,
    pub relative_path: String,
    pub kind: String,         // "model" or "image"
    pub is_primary: bool,
    pub sort_order: i32,      // contiguous from 0 within design + kind
    pub original_file_name: String,
    pub content_hash: String, // 64-char hex SHA256
    pub size: i64,
    pub created_at: i64,
}

impl Model {
    pub fn asset_kind(&self) -> Option<AssetKind> {
        self.kind.parse().ok()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::design::Entity",
        from = "Column::DesignId",
        to = "super::design::Column::Id",
        on_delete = "Cascade"
    )]
    Design,
}

impl Related<super::design::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Design.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// What an asset file holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Model,
    Image,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Model => "model",
            AssetKind::Image => "image",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model" => Ok(AssetKind::Model),
            "image" => Ok(AssetKind::Image),
            other => Err(format!("unknown asset kind '{}'", other)),
        }
    }
}
