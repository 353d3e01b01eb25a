use crate::models::LineData;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Frozen copy of a cart line. Later catalog edits never reach it.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_lines")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub order_id: i32,
    pub variant_id: i32,
    pub product_name: String,
    pub variant_name: String,
    #[sea_orm(nullable)]
    pub sku: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total: i64,
    #[sea_orm(column_type = "Text")]
    pub data: String,
    pub is_shipping_required: bool,
}

impl Model {
    pub fn line_data(&self) -> LineData {
        LineData::from_canonical(&self.data).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
