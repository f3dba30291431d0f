//! Model type entry: catalogue key with display metadata

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "model_types")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    pub display_title: String,
    pub material_category: String,
    pub design_id: Option<i32>, // non-owning, set once the design exists
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::design::Entity",
        from = "Column::DesignId",
        to = "super::design::Column::Id",
        on_delete = "SetNull"
    )]
    Design,
}

impl Related<super::design::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Design.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
