use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::payments::{StartPaymentInput, StartPaymentOutcome, VerificationResult},
    AppState,
};
use axum::extract::{Json, Path, State};

/// Converts the cart (or picks up an unpaid order) and opens a gateway
/// payment. Answers with the page the customer should be sent to.
pub async fn start_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<StartPaymentInput>,
) -> Result<Json<StartPaymentOutcome>, ServiceError> {
    let outcome = state
        .services
        .payments
        .start_payment(user.user_id, payload)
        .await?;
    Ok(Json(outcome))
}

/// Gateway callback. The customer's browser lands here, so no token is required.
pub async fn verify_payment(
    State(state): State<AppState>,
    Path((authority, status)): Path<(String, String)>,
) -> Result<Json<VerificationResult>, ServiceError> {
    let result = state.services.payments.verify(&authority, &status).await?;
    Ok(Json(result))
}
