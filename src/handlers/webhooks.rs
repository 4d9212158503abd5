use crate::handlers::common::map_service_error;
use crate::{
    errors::{ApiError, ServiceError},
    metrics,
    payments::stripe::{parse_webhook_event, verify_webhook_signature},
    AppState,
};
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use tracing::{info, warn};

const SIGNATURE_HEADER: &str = "stripe-signature";
const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Creates the router for payment webhook endpoints
pub fn routes() -> Router<AppState> {
    Router::new().route("/webhook", post(handle_webhook))
}

/// Receive a payment gateway webhook.
///
/// The signature is verified against the raw body before anything is
/// parsed. Unhandled event types are acknowledged so the gateway stops
/// retrying them; a failed finalization returns 5xx so it retries.
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    metrics::WEBHOOK_EVENTS_RECEIVED.inc();

    let secret = state.config.stripe_webhook_secret.as_deref().ok_or_else(|| {
        warn!("Webhook received but no webhook secret is configured");
        map_service_error(ServiceError::InternalError(
            "webhook secret not configured".to_string(),
        ))
    })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            metrics::WEBHOOK_SIGNATURE_FAILURES.inc();
            map_service_error(ServiceError::Unauthorized(
                "missing webhook signature".to_string(),
            ))
        })?;

    verify_webhook_signature(
        &body,
        signature,
        secret,
        state.config.stripe_webhook_tolerance_secs,
    )
    .map_err(|err| {
        metrics::WEBHOOK_SIGNATURE_FAILURES.inc();
        map_service_error(err)
    })?;

    let event = parse_webhook_event(&body).map_err(map_service_error)?;

    if event.event_type != CHECKOUT_COMPLETED {
        info!(event_type = %event.event_type, "Ignoring unhandled webhook event type");
        return Ok(Json(json!({ "received": true, "handled": false })).into_response());
    }

    let outcome = match state.services.orders.finalize_from_session(&event.session).await {
        Ok(outcome) => outcome,
        // Completed-but-unpaid sessions (async payment methods) are
        // acknowledged so the gateway does not retry; the paid event for
        // the session will arrive separately.
        Err(ServiceError::PaymentFailed(_)) => {
            info!(payment_reference = %event.session.id, "Session not settled yet; acknowledging");
            return Ok(Json(json!({ "received": true, "handled": false })).into_response());
        }
        Err(err) => return Err(map_service_error(err)),
    };

    info!(
        order_id = %outcome.order.id,
        created = outcome.created,
        "Webhook finalization complete"
    );
    Ok(Json(json!({
        "received": true,
        "handled": true,
        "order_id": outcome.order.id,
        "created": outcome.created,
    }))
    .into_response())
}
