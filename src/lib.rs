//! Storefront API: catalog, carts, discounts, hosted checkout, and
//! webhook-driven order finalization.

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod payments;
pub mod services;
pub mod tracing;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use config::AppConfig;
use events::EventSender;
use payments::PaymentGateway;

/// Shared application state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub services: handlers::AppServices,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppState {
    /// Wires up services over a database connection and payment gateway.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        let carts = services::CartService::new(db.clone(), event_sender.clone());
        let catalog = services::CatalogService::new(db.clone());
        let coupons = services::CouponService::new(db.clone());
        let gift_cards = services::GiftCardService::new(db.clone());
        let checkout = services::CheckoutService::new(
            config.clone(),
            gateway.clone(),
            carts.clone(),
            coupons.clone(),
            gift_cards.clone(),
            event_sender.clone(),
        );
        let orders = services::OrderService::new(
            db.clone(),
            gateway.clone(),
            carts.clone(),
            coupons.clone(),
            gift_cards.clone(),
            event_sender.clone(),
        );

        Self {
            db,
            config,
            event_sender,
            services: handlers::AppServices {
                carts,
                catalog,
                coupons,
                gift_cards,
                checkout,
                orders,
            },
            gateway,
        }
    }
}

// Common response wrappers
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Builds the `/api` router: catalog, cart, discounts, checkout, webhook,
/// and order endpoints, plus status and health.
pub fn api_routes() -> Router<AppState> {
    // The webhook and checkout endpoints share the /stripe prefix; only the
    // webhook skips shopper extraction, and it is signature-verified instead.
    let stripe = handlers::checkout::routes().merge(handlers::webhooks::routes());

    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .merge(handlers::catalog::routes())
        .nest("/cart", handlers::carts::routes())
        .nest("/coupons", handlers::coupons::routes())
        .nest("/gift-cards", handlers::gift_cards::routes())
        .nest("/orders", handlers::orders::routes())
        .nest("/stripe", stripe)
}

async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let status_data = json!({
        "status": "ok",
        "service": "storefront-api",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    });
    Json(ApiResponse::success(status_data))
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "database": db_status,
        "timestamp": Utc::now().to_rfc3339(),
    });
    Json(ApiResponse::success(health_data))
}

#[cfg(test)]
mod response_tests {
    use super::*;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        assert!(response.success);
        assert_eq!(response.data, Some("ok"));
        let meta = response.meta.expect("meta");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
    }

    #[tokio::test]
    async fn error_response_carries_message() {
        let response = ApiResponse::<()>::error("oops".into());
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("oops"));
    }
}
