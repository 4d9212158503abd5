//! Stripe-backed [`PaymentGateway`] implementation plus webhook signature
//! verification.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::errors::ServiceError;

use super::{CheckoutSession, CreateSessionRequest, PaymentGateway, SessionPaymentStatus};

const DEFAULT_API_BASE: &str = "https://api.stripe.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

type HmacSha256 = Hmac<Sha256>;

pub struct StripeGateway {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            secret_key: secret_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Points the gateway at a different API host (mock server in tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<serde_json::Value, ServiceError> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("stripe request: {}", e)))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("stripe response: {}", e)))?;

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            warn!(%status, message, "Stripe API call failed");
            return Err(ServiceError::ExternalServiceError(format!(
                "stripe {}: {}",
                status, message
            )));
        }
        Ok(body)
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, ServiceError> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("stripe request: {}", e)))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("stripe response: {}", e)))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound("checkout session".to_string()));
        }
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(ServiceError::ExternalServiceError(format!(
                "stripe {}: {}",
                status, message
            )));
        }
        Ok(body)
    }

    /// Creates a one-off amount coupon so a flat discount can be attached to
    /// the session.
    async fn create_discount_coupon(
        &self,
        amount_off: i64,
        currency: &str,
    ) -> Result<String, ServiceError> {
        let form = vec![
            ("amount_off".to_string(), amount_off.to_string()),
            ("currency".to_string(), currency.to_lowercase()),
            ("duration".to_string(), "once".to_string()),
        ];
        let body = self.post_form("/v1/coupons", &form).await?;
        body.get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::ExternalServiceError("stripe coupon response missing id".to_string())
            })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];

        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }

        for (i, item) in request.line_items.iter().enumerate() {
            form.push((
                format!("line_items[{}][price_data][currency]", i),
                request.currency.to_lowercase(),
            ));
            form.push((
                format!("line_items[{}][price_data][unit_amount]", i),
                item.unit_amount.to_string(),
            ));
            form.push((
                format!("line_items[{}][price_data][product_data][name]", i),
                item.name.clone(),
            ));
            form.push((format!("line_items[{}][quantity]", i), item.quantity.to_string()));
        }

        if request.discount_amount > 0 {
            let coupon_id = self
                .create_discount_coupon(request.discount_amount, &request.currency)
                .await?;
            form.push(("discounts[0][coupon]".to_string(), coupon_id));
        }

        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let body = self.post_form("/v1/checkout/sessions", &form).await?;
        let session: StripeSession = serde_json::from_value(body).map_err(|e| {
            ServiceError::ExternalServiceError(format!("stripe session decode: {}", e))
        })?;
        debug!(session_id = %session.id, "Checkout session created");
        Ok(session.into())
    }

    #[instrument(skip(self))]
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        let body = self
            .get_json(&format!("/v1/checkout/sessions/{}", session_id))
            .await?;
        let session: StripeSession = serde_json::from_value(body).map_err(|e| {
            ServiceError::ExternalServiceError(format!("stripe session decode: {}", e))
        })?;
        Ok(session.into())
    }
}

/// Wire shape of a Stripe checkout session, shared by the REST responses and
/// the webhook payload's `data.object`.
#[derive(Debug, Deserialize)]
pub struct StripeSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    pub payment_status: String,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<StripeCustomerDetails>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

impl From<StripeSession> for CheckoutSession {
    fn from(s: StripeSession) -> Self {
        let payment_status = match s.payment_status.as_str() {
            "paid" => SessionPaymentStatus::Paid,
            "no_payment_required" => SessionPaymentStatus::NoPaymentRequired,
            _ => SessionPaymentStatus::Unpaid,
        };
        let customer_email = s
            .customer_email
            .or_else(|| s.customer_details.and_then(|d| d.email));
        CheckoutSession {
            id: s.id,
            url: s.url,
            payment_status,
            amount_total: s.amount_total.unwrap_or(0),
            currency: s.currency.unwrap_or_default().to_uppercase(),
            customer_email,
            metadata: s.metadata.unwrap_or_default(),
        }
    }
}

/// A verified, decoded webhook event.
#[derive(Debug)]
pub struct WebhookEvent {
    pub event_type: String,
    pub session: CheckoutSession,
}

#[derive(Debug, Deserialize)]
struct StripeEventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeSession,
}

/// Decodes a webhook payload. Call [`verify_webhook_signature`] first.
pub fn parse_webhook_event(payload: &[u8]) -> Result<WebhookEvent, ServiceError> {
    let envelope: StripeEventEnvelope = serde_json::from_slice(payload)
        .map_err(|e| ServiceError::ValidationError(format!("webhook payload: {}", e)))?;
    Ok(WebhookEvent {
        event_type: envelope.event_type,
        session: envelope.data.object.into(),
    })
}

/// Verifies a `Stripe-Signature` header against the raw payload.
///
/// The header carries a timestamp and one or more `v1` signatures; the
/// expected signature is HMAC-SHA256 over `"{timestamp}.{payload}"` keyed
/// with the endpoint secret. The timestamp must be within `tolerance_secs`
/// of the current clock to blunt replay.
pub fn verify_webhook_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: u64,
) -> Result<(), ServiceError> {
    verify_webhook_signature_at(
        payload,
        signature_header,
        secret,
        tolerance_secs,
        chrono::Utc::now().timestamp(),
    )
}

fn verify_webhook_signature_at(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), ServiceError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ServiceError::Unauthorized("malformed webhook signature".to_string()))?;
    if signatures.is_empty() {
        return Err(ServiceError::Unauthorized(
            "malformed webhook signature".to_string(),
        ));
    }

    if (now - timestamp).unsigned_abs() > tolerance_secs {
        return Err(ServiceError::Unauthorized(
            "webhook timestamp outside tolerance".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InternalError("invalid webhook secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    // Mac::verify_slice is constant-time.
    let matched = signatures.iter().any(|sig| {
        hex::decode(sig)
            .ok()
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            "webhook signature mismatch".to_string(),
        ))
    }
}
