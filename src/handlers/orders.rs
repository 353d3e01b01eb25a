use crate::handlers::common::{PaginatedResponse, PaginationParams};
use crate::{
    auth::AuthUser,
    entities::address,
    errors::ServiceError,
    services::orders::OrderView,
    AppState,
};
use axum::extract::{Json, Path, Query, State};

/// The caller's orders, newest first.
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<OrderView>>, ServiceError> {
    let per_page = params
        .per_page
        .unwrap_or(state.config.orders_per_page)
        .clamp(1, 100);
    let page = state
        .services
        .orders
        .list_orders(user.user_id, params.page.max(1), per_page)
        .await?;
    Ok(Json(PaginatedResponse::new(
        page.orders,
        page.page,
        page.per_page,
        page.total,
    )))
}

pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<i32>,
) -> Result<Json<OrderView>, ServiceError> {
    let order = state.services.orders.get_order(user.user_id, order_id).await?;
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<i32>,
) -> Result<Json<OrderView>, ServiceError> {
    let order = state
        .services
        .orders
        .cancel_order(user.user_id, order_id)
        .await?;
    Ok(Json(order))
}

/// Saved addresses, for picking one at checkout.
pub async fn list_addresses(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<address::Model>>, ServiceError> {
    let addresses = state.services.addresses.list_for_user(user.user_id).await?;
    Ok(Json(addresses))
}
