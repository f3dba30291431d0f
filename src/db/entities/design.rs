//! Design entity: aggregate root for one model type's uploaded content

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "designs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub material_category: String,
    pub preview_image_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::asset_file::Entity")]
    AssetFiles,
}

impl Related<super::asset_file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AssetFiles.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
