use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, PaginatedResponse,
    PaginationParams,
};
use crate::{
    auth::RequireUser,
    entities::{FulfillmentStatus, OrderItemModel, OrderModel, PaymentStatus},
    errors::ApiError,
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for order endpoints
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/lookup-by-session", get(lookup_by_session))
        .route("/create-from-session", post(create_from_session))
}

/// Look up an order by checkout session id.
///
/// The storefront polls this after the payment redirect; 404 means the
/// webhook has not landed yet and the client may fall back to
/// `create-from-session`.
async fn lookup_by_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    let (order, items) = state
        .services
        .orders
        .get_by_payment_reference(&query.session_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(OrderResponse::from_parts(order, items)))
}

/// Create (or fetch) the order for a paid checkout session.
///
/// Client-driven fallback to the webhook. Returns 201 when this call
/// created the order and 200 when it already existed.
async fn create_from_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateFromSessionRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let outcome = state
        .services
        .orders
        .finalize_by_reference(&payload.session_id)
        .await
        .map_err(map_service_error)?;

    let items = state
        .services
        .orders
        .items_for(outcome.order.id)
        .await
        .map_err(map_service_error)?;
    let body = OrderResponse::from_parts(outcome.order, items);

    if outcome.created {
        Ok(created_response(body))
    } else {
        Ok(success_response(body))
    }
}

/// List the signed-in user's orders
async fn list_orders(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<Response, ApiError> {
    let page = state
        .services
        .orders
        .list_for_user(user_id, pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    let orders: Vec<OrderSummaryResponse> =
        page.orders.into_iter().map(OrderSummaryResponse::from).collect();
    Ok(success_response(PaginatedResponse::new(
        orders,
        page.page,
        page.per_page,
        page.total,
    )))
}

/// Get one of the signed-in user's orders, with lines
async fn get_order(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Path(order_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let (order, items) = state
        .services
        .orders
        .get_for_user(order_id, user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(OrderResponse::from_parts(order, items)))
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: String,
}

#[derive(Debug, Deserialize, Validate)]
struct CreateFromSessionRequest {
    #[validate(length(min = 1, max = 255))]
    session_id: String,
}

#[derive(Debug, Serialize)]
struct OrderSummaryResponse {
    id: Uuid,
    payment_reference: String,
    amount_total: Decimal,
    currency: String,
    payment_status: PaymentStatus,
    fulfillment_status: FulfillmentStatus,
    created_at: DateTime<Utc>,
}

impl From<OrderModel> for OrderSummaryResponse {
    fn from(order: OrderModel) -> Self {
        Self {
            id: order.id,
            payment_reference: order.payment_reference,
            amount_total: order.amount_total,
            currency: order.currency,
            payment_status: order.payment_status,
            fulfillment_status: order.fulfillment_status,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    id: Uuid,
    payment_reference: String,
    guest_email: Option<String>,
    amount_total: Decimal,
    discount_total: Decimal,
    gift_card_total: Decimal,
    currency: String,
    payment_status: PaymentStatus,
    fulfillment_status: FulfillmentStatus,
    shipping_name: Option<String>,
    shipping_address: Option<String>,
    shipping_city: Option<String>,
    shipping_postal_code: Option<String>,
    shipping_country: Option<String>,
    items: Vec<OrderItemResponse>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct OrderItemResponse {
    product_id: Option<Uuid>,
    product_name: String,
    quantity: i32,
    unit_price: Decimal,
}

impl OrderResponse {
    fn from_parts(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            id: order.id,
            payment_reference: order.payment_reference,
            guest_email: order.guest_email,
            amount_total: order.amount_total,
            discount_total: order.discount_total,
            gift_card_total: order.gift_card_total,
            currency: order.currency,
            payment_status: order.payment_status,
            fulfillment_status: order.fulfillment_status,
            shipping_name: order.shipping_name,
            shipping_address: order.shipping_address,
            shipping_city: order.shipping_city,
            shipping_postal_code: order.shipping_postal_code,
            shipping_country: order.shipping_country,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id,
                    product_name: item.product_name,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            created_at: order.created_at,
        }
    }
}
