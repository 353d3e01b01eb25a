use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable snapshot of a converted cart.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub status: OrderStatus,
    pub user_id: i32,
    pub address_id: i32,
    /// Token of the cart this order was created from. The cart itself is gone.
    #[sea_orm(nullable)]
    pub cart_token: Option<Uuid>,
    pub total: i64,
    pub quantity: i32,
    #[sea_orm(column_type = "Json")]
    pub checkout_data: Json,
    pub create_time: DateTime<Utc>,
    pub last_status_change: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    Lines,
    #[sea_orm(has_one = "super::payment::Entity")]
    Payment,
    #[sea_orm(
        belongs_to = "super::address::Entity",
        from = "Column::AddressId",
        to = "super::address::Column::Id"
    )]
    Address,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lines.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl Related<super::address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Address.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order status enumeration.
///
/// ```text
/// Unfulfiled -> Fulfiled | Canceled
/// Fulfiled   -> Done | Canceled
/// ```
/// `Done` and `Canceled` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "Unfulfiled")]
    Unfulfiled,
    #[sea_orm(string_value = "Fulfiled")]
    Fulfiled,
    #[sea_orm(string_value = "Done")]
    Done,
    #[sea_orm(string_value = "Canceled")]
    Canceled,
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Unfulfiled, Fulfiled) | (Unfulfiled, Canceled) | (Fulfiled, Done) | (Fulfiled, Canceled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Done | OrderStatus::Canceled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            OrderStatus::Unfulfiled => "Unfulfiled",
            OrderStatus::Fulfiled => "Fulfiled",
            OrderStatus::Done => "Done",
            OrderStatus::Canceled => "Canceled",
        };
        f.write_str(label)
    }
}
