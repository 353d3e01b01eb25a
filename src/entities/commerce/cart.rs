use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shopping cart entity, addressed by an unguessable token.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "carts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub token: Uuid,
    pub status: CartStatus,
    #[sea_orm(nullable)]
    pub user_id: Option<i32>,
    #[sea_orm(column_type = "Json")]
    pub checkout_data: Json,
    /// Sum of line totals, maintained by the cart service on every mutation.
    pub total: i64,
    pub quantity: i32,
    pub create_time: DateTime<Utc>,
    pub last_status_change: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_line::Entity")]
    Lines,
    #[sea_orm(
        belongs_to = "crate::entities::user::Entity",
        from = "Column::UserId",
        to = "crate::entities::user::Column::Id"
    )]
    User,
}

impl Related<super::cart_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lines.def()
    }
}

impl Related<crate::entities::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Cart status enumeration. `Canceled` is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "lowercase")]
pub enum CartStatus {
    #[sea_orm(string_value = "open")]
    Open,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl CartStatus {
    pub fn can_transition_to(self, next: CartStatus) -> bool {
        matches!((self, next), (CartStatus::Open, CartStatus::Canceled))
    }
}
