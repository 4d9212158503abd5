use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{auth::Shopper, errors::ApiError, AppState};
use axum::{
    extract::{Json, State},
    response::Response,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Creates the router for coupon endpoints
pub fn routes() -> Router<AppState> {
    Router::new().route("/validate", post(validate_coupon))
}

/// Validate a coupon against the shopper's current cart and quote its
/// discount. Rejections come back as 400s carrying the specific reason.
async fn validate_coupon(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .get_cart(&shopper)
        .await
        .map_err(map_service_error)?;

    let quote = state
        .services
        .coupons
        .validate_for_cart(&payload.code, &cart.items, cart.subtotal, shopper.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CouponQuoteResponse {
        code: quote.coupon.code,
        description: quote.coupon.description,
        discount: quote.discount,
        eligible_subtotal: quote.eligible_subtotal,
        cart_subtotal: cart.subtotal,
    }))
}

#[derive(Debug, Deserialize, Validate)]
struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    code: String,
}

#[derive(Debug, Serialize)]
struct CouponQuoteResponse {
    code: String,
    description: Option<String>,
    discount: Decimal,
    eligible_subtotal: Decimal,
    cart_subtotal: Decimal,
}
