use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Groups products that share shipping and upload rules.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_types")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    /// When false every product of this type has exactly one synthetic variant.
    pub has_variants: bool,
    pub is_shipping_required: bool,
    /// Lines for these products must carry an uploaded file.
    pub is_file_required: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product::Entity")]
    Products,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Products.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
