use crate::models::AttributeMap;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Purchasable unit of a product, tracking its own stock.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_variants")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub product_id: i32,
    #[sea_orm(unique, nullable)]
    pub sku: Option<String>,
    pub name: String,
    #[sea_orm(nullable)]
    pub price_override: Option<i64>,
    #[sea_orm(column_type = "Json")]
    pub attributes: AttributeMap,
    pub quantity: i32,
    pub quantity_allocated: i32,
}

impl Model {
    /// Units that can still be promised to new orders. Never negative.
    pub fn quantity_available(&self) -> i32 {
        (self.quantity - self.quantity_allocated).max(0)
    }

    pub fn check_quantity(&self, requested: i32) -> bool {
        requested <= self.quantity_available()
    }

    pub fn unit_price(&self, product: &super::product::Model) -> i64 {
        self.price_override.unwrap_or(product.price)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
