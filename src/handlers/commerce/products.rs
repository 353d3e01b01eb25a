use crate::handlers::common::PaginatedResponse;
use crate::{
    errors::ServiceError,
    services::catalog::{ProductDetail, ProductQuery, ProductSummary},
    AppState,
};
use axum::extract::{Json, Path, Query, State};

/// Published products. `?page=&per_page=&order=cheap_first|expensive_first|newest&featured_only=`
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<PaginatedResponse<ProductSummary>>, ServiceError> {
    let page = query.page.max(1);
    let per_page = query.per_page.clamp(1, 100);
    let (products, total) = state.services.catalog.list_products(query).await?;
    Ok(Json(PaginatedResponse::new(products, page, per_page, total)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> Result<Json<ProductDetail>, ServiceError> {
    let product = state.services.catalog.get_product(product_id).await?;
    Ok(Json(product))
}
