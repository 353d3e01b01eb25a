use crate::models::LineData;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cart_lines")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub cart_token: Uuid,
    pub variant_id: i32,
    pub quantity: i32,
    /// Canonical [`LineData`] text. Part of the line's identity.
    #[sea_orm(column_type = "Text")]
    pub data: String,
}

impl Model {
    pub fn line_data(&self) -> LineData {
        LineData::from_canonical(&self.data).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cart::Entity",
        from = "Column::CartToken",
        to = "super::cart::Column::Token",
        on_delete = "Cascade"
    )]
    Cart,
    #[sea_orm(
        belongs_to = "crate::entities::catalog::product_variant::Entity",
        from = "Column::VariantId",
        to = "crate::entities::catalog::product_variant::Column::Id"
    )]
    Variant,
}

impl Related<super::cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cart.def()
    }
}

impl Related<crate::entities::catalog::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
