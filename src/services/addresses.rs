use crate::{
    auth::UserId,
    entities::address::{self, Entity as Address},
    errors::ServiceError,
};
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;

/// Read-only view of users' saved addresses.
#[derive(Clone)]
pub struct AddressBook {
    db: Arc<DatabaseConnection>,
}

impl AddressBook {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<address::Model>, ServiceError> {
        Ok(Address::find()
            .filter(address::Column::UserId.eq(user_id))
            .order_by_asc(address::Column::Id)
            .all(&*self.db)
            .await?)
    }
}

/// Someone else's address is reported exactly like a missing one.
pub async fn find_owned_address(
    conn: &impl ConnectionTrait,
    user_id: UserId,
    address_id: i32,
) -> Result<address::Model, ServiceError> {
    Address::find_by_id(address_id)
        .filter(address::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Address", address_id))
}
