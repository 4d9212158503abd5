use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    auth::{self, Shopper},
    config::AppConfig,
    errors::ApiError,
    AppState,
};
use axum::{
    extract::{Json, State},
    http::header::SET_COOKIE,
    response::Response,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/add", post(add_item))
        .route("/update", post(update_item))
        .route("/clear", post(clear_cart))
}

/// Get the current cart with priced lines
async fn get_cart(
    State(state): State<AppState>,
    shopper: Shopper,
) -> Result<Response, ApiError> {
    let view = state
        .services
        .carts
        .get_cart(&shopper)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(view))
}

/// Add a product to the cart, minting a guest session if needed
async fn add_item(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(payload): Json<AddItemRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let (shopper, minted_token) = upgrade_anonymous(shopper);
    let view = state
        .services
        .carts
        .add_item(&shopper, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(with_cart_cookie(
        success_response(view),
        &state.config,
        minted_token,
    ))
}

/// Set a cart line's quantity; zero removes the line
async fn update_item(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let view = state
        .services
        .carts
        .update_item_quantity(&shopper, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(view))
}

/// Remove every line from the cart
async fn clear_cart(
    State(state): State<AppState>,
    shopper: Shopper,
) -> Result<Response, ApiError> {
    let view = state
        .services
        .carts
        .clear_cart(&shopper)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(view))
}

/// Gives an anonymous shopper a guest session token so they can own a cart.
/// Only write endpoints call this; read endpoints never set the cookie.
fn upgrade_anonymous(shopper: Shopper) -> (Shopper, Option<String>) {
    if shopper.is_anonymous() {
        let token = auth::mint_session_token();
        (Shopper::guest(token.clone()), Some(token))
    } else {
        (shopper, None)
    }
}

fn with_cart_cookie(
    mut response: Response,
    config: &AppConfig,
    minted_token: Option<String>,
) -> Response {
    if let Some(token) = minted_token {
        if let Some(value) = auth::cart_cookie_header(config, &token) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}

#[derive(Debug, Deserialize, Validate)]
struct AddItemRequest {
    product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateItemRequest {
    product_id: Uuid,
    #[validate(range(min = 0, max = 999))]
    quantity: i32,
}
