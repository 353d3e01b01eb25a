use crate::handlers::common::{validate_input, CartTokenQuery, MessageResponse};
use crate::{
    auth::MaybeUser,
    errors::ServiceError,
    models::LineData,
    services::commerce::{AddToCartInput, CartView},
    AppState,
};
use axum::extract::{Json, Multipart, Query, State};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize)]
pub struct CartEnvelope {
    pub cart: Option<CartView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CartResponse {
    pub cart_token: Uuid,
    pub cart: CartView,
}

impl From<CartView> for CartResponse {
    fn from(cart: CartView) -> Self {
        Self {
            cart_token: cart.token,
            cart,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLineRequest {
    pub line_id: i32,
    #[validate(range(min = 0))]
    pub count: i32,
}

/// Current cart, or `{"cart": null}`.
pub async fn get_cart(
    State(state): State<AppState>,
    user: MaybeUser,
    Query(query): Query<CartTokenQuery>,
) -> Result<Json<CartEnvelope>, ServiceError> {
    let cart = state
        .services
        .carts
        .get_cart(user.user_id(), query.token())
        .await?;
    Ok(Json(CartEnvelope { cart }))
}

/// Multipart form: `variant_id`, `count` (default 1), optional `file`.
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: MaybeUser,
    Query(query): Query<CartTokenQuery>,
    mut multipart: Multipart,
) -> Result<Json<CartResponse>, ServiceError> {
    let mut variant_id = None;
    let mut count = None;
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("variant_id") => variant_id = Some(parse_int("variant_id", &read_text(field).await?)?),
            Some("count") => count = Some(parse_int("count", &read_text(field).await?)?),
            Some(LineData::FILE_KEY) => {
                let file_name = field.file_name().map(str::to_owned);
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::BadRequest(format!("Could not read upload: {e}")))?;
                if !content.is_empty() {
                    upload = Some((file_name, content));
                }
            }
            _ => {}
        }
    }

    let variant_id = variant_id
        .ok_or_else(|| ServiceError::ValidationError("variant_id is required".to_string()))?;

    // The file is written only once the form is complete and removed again
    // if the line is rejected.
    let files = &state.services.files;
    let mut data = LineData::new();
    let stored_url = match upload {
        Some((file_name, content)) => {
            let url = files.store(file_name.as_deref(), content).await?;
            data.insert(LineData::FILE_KEY, url.clone());
            Some(url)
        }
        None => None,
    };
    let input = AddToCartInput {
        variant_id,
        quantity: count.unwrap_or(1),
        data,
    };

    match state
        .services
        .carts
        .add(user.user_id(), query.token(), input)
        .await
    {
        Ok(cart) => Ok(Json(cart.into())),
        Err(err) => {
            if let Some(url) = stored_url {
                if let Err(cleanup) = files.remove(&url).await {
                    warn!(%url, error = %cleanup, "could not remove rejected upload");
                }
            }
            Err(err)
        }
    }
}

/// JSON `{line_id, count}`; a count of zero removes the line.
pub async fn update_cart_line(
    State(state): State<AppState>,
    user: MaybeUser,
    Query(query): Query<CartTokenQuery>,
    Json(payload): Json<UpdateLineRequest>,
) -> Result<Json<CartResponse>, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .update_line(user.user_id(), query.token(), payload.line_id, payload.count)
        .await?;
    Ok(Json(cart.into()))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    user: MaybeUser,
    Query(query): Query<CartTokenQuery>,
) -> Result<Json<MessageResponse>, ServiceError> {
    state
        .services
        .carts
        .clear(user.user_id(), query.token())
        .await?;
    Ok(Json(MessageResponse::new("Cart cleared")))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ServiceError> {
    field
        .text()
        .await
        .map_err(|e| ServiceError::BadRequest(format!("Invalid form field: {e}")))
}

fn parse_int(name: &str, raw: &str) -> Result<i32, ServiceError> {
    raw.trim()
        .parse()
        .map_err(|_| ServiceError::ValidationError(format!("{name} must be an integer")))
}
