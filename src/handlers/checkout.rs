use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{auth::Shopper, errors::ApiError, services::checkout::StartCheckoutInput, AppState};
use axum::{
    extract::{Json, State},
    response::Response,
    routing::post,
    Router,
};
use serde::Deserialize;
use validator::Validate;

/// Creates the router for checkout endpoints
pub fn routes() -> Router<AppState> {
    Router::new().route("/checkout", post(start_checkout))
}

/// Start a hosted checkout session for the shopper's cart
async fn start_checkout(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(payload): Json<StartCheckoutRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let input = StartCheckoutInput {
        coupon_code: payload.coupon_code,
        gift_card_code: payload.gift_card_code,
        guest_email: payload.email,
        guest_phone: payload.phone,
        shipping_name: payload.shipping_name,
        shipping_address: payload.shipping_address,
        shipping_city: payload.shipping_city,
        shipping_postal_code: payload.shipping_postal_code,
        shipping_country: payload.shipping_country,
    };

    let result = state
        .services
        .checkout
        .start(&shopper, input)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(result))
}

#[derive(Debug, Deserialize, Validate)]
struct StartCheckoutRequest {
    #[validate(length(max = 64))]
    coupon_code: Option<String>,
    #[validate(length(max = 64))]
    gift_card_code: Option<String>,
    /// Contact email; required for guests, optional for signed-in shoppers
    #[validate(email)]
    email: Option<String>,
    #[validate(length(max = 32))]
    phone: Option<String>,
    #[validate(length(max = 255))]
    shipping_name: Option<String>,
    #[validate(length(max = 255))]
    shipping_address: Option<String>,
    #[validate(length(max = 128))]
    shipping_city: Option<String>,
    #[validate(length(max = 32))]
    shipping_postal_code: Option<String>,
    #[validate(length(max = 2))]
    shipping_country: Option<String>,
}
