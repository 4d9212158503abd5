use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{auth::Shopper, errors::ApiError, services::gift_cards::applicable_amount, AppState};
use axum::{
    extract::{Json, State},
    response::Response,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Creates the router for gift card endpoints
pub fn routes() -> Router<AppState> {
    Router::new().route("/validate", post(validate_gift_card))
}

/// Validate a gift card and report how much of the shopper's cart it can
/// cover right now.
async fn validate_gift_card(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(payload): Json<ValidateGiftCardRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let card = state
        .services
        .gift_cards
        .validate(&payload.code)
        .await
        .map_err(map_service_error)?;

    let cart = state
        .services
        .carts
        .get_cart(&shopper)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(GiftCardQuoteResponse {
        code: card.code.clone(),
        remaining_amount: card.remaining_amount,
        applicable_amount: applicable_amount(&card, cart.subtotal),
        cart_subtotal: cart.subtotal,
    }))
}

#[derive(Debug, Deserialize, Validate)]
struct ValidateGiftCardRequest {
    #[validate(length(min = 1, max = 64))]
    code: String,
}

#[derive(Debug, Serialize)]
struct GiftCardQuoteResponse {
    code: String,
    remaining_amount: Decimal,
    applicable_amount: Decimal,
    cart_subtotal: Decimal,
}
