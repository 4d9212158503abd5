//! Payment gateway abstraction.
//!
//! Checkout and order finalization talk to the gateway through the
//! [`PaymentGateway`] trait so tests can substitute a fake without a network.
//! Amounts cross this boundary in minor units (cents), the way card
//! processors quote them; everything inside the services stays `Decimal`.

pub mod stripe;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::ServiceError;

pub use stripe::StripeGateway;

/// One purchasable line in a hosted checkout session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLineItem {
    pub product_id: Uuid,
    pub name: String,
    /// Unit price in minor units
    pub unit_amount: i64,
    pub quantity: i64,
}

/// Everything needed to open a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub line_items: Vec<SessionLineItem>,
    pub currency: String,
    /// Flat discount applied across the session, minor units
    pub discount_amount: i64,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

/// A gateway checkout session, freshly created or retrieved later.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Gateway session id; doubles as the order's payment reference
    pub id: String,
    /// Hosted payment page URL (present on freshly created sessions)
    pub url: Option<String>,
    pub payment_status: SessionPaymentStatus,
    /// Total charged, minor units
    pub amount_total: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl SessionPaymentStatus {
    /// Whether the session represents settled payment. Zero-due sessions
    /// (fully covered by gift card) complete as `no_payment_required`.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::NoPaymentRequired)
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a hosted checkout session and returns it with a redirect URL.
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, ServiceError>;

    /// Retrieves a session by id, with line items expanded.
    async fn retrieve_checkout_session(&self, session_id: &str)
        -> Result<CheckoutSession, ServiceError>;
}

/// Compact line-item snapshot carried in session metadata. If the cart is
/// gone by the time the order is finalized (cleared, cookie lost), these
/// rows are the fallback source for order items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "p")]
    pub product_id: Uuid,
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "q")]
    pub quantity: i64,
    /// Unit price in minor units
    #[serde(rename = "u")]
    pub unit_amount: i64,
}

/// Checkout context carried through the gateway as session metadata and
/// recovered when the order is finalized. Every value is a string because
/// that is all gateway metadata can hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetadata {
    pub user_id: Option<Uuid>,
    pub cart_session_token: Option<String>,
    pub cart_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub coupon_code: Option<String>,
    pub coupon_discount: Option<Decimal>,
    pub gift_card_code: Option<String>,
    pub gift_card_amount: Option<Decimal>,
    pub shipping_name: Option<String>,
    pub shipping_address: Option<String>,
    pub shipping_city: Option<String>,
    pub shipping_postal_code: Option<String>,
    pub shipping_country: Option<String>,
    pub items: Vec<MetadataItem>,
}

impl SessionMetadata {
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                map.insert(key.to_string(), v);
            }
        };
        put("user_id", self.user_id.map(|id| id.to_string()));
        put("cart_session_token", self.cart_session_token.clone());
        put("cart_id", self.cart_id.map(|id| id.to_string()));
        put("guest_email", self.guest_email.clone());
        put("guest_phone", self.guest_phone.clone());
        put("coupon_code", self.coupon_code.clone());
        put("coupon_discount", self.coupon_discount.map(|d| d.to_string()));
        put("gift_card_code", self.gift_card_code.clone());
        put("gift_card_amount", self.gift_card_amount.map(|d| d.to_string()));
        put("shipping_name", self.shipping_name.clone());
        put("shipping_address", self.shipping_address.clone());
        put("shipping_city", self.shipping_city.clone());
        put("shipping_postal_code", self.shipping_postal_code.clone());
        put("shipping_country", self.shipping_country.clone());
        if !self.items.is_empty() {
            if let Ok(encoded) = serde_json::to_string(&self.items) {
                map.insert("items".to_string(), encoded);
            }
        }
        map
    }

    /// Recovers metadata from a session. Unparseable values are dropped
    /// rather than failing the whole finalization.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let get = |key: &str| map.get(key).cloned();
        Self {
            user_id: get("user_id").and_then(|v| Uuid::parse_str(&v).ok()),
            cart_session_token: get("cart_session_token"),
            cart_id: get("cart_id").and_then(|v| Uuid::parse_str(&v).ok()),
            guest_email: get("guest_email"),
            guest_phone: get("guest_phone"),
            coupon_code: get("coupon_code"),
            coupon_discount: get("coupon_discount").and_then(|v| v.parse().ok()),
            gift_card_code: get("gift_card_code"),
            gift_card_amount: get("gift_card_amount").and_then(|v| v.parse().ok()),
            shipping_name: get("shipping_name"),
            shipping_address: get("shipping_address"),
            shipping_city: get("shipping_city"),
            shipping_postal_code: get("shipping_postal_code"),
            shipping_country: get("shipping_country"),
            items: get("items")
                .and_then(|v| serde_json::from_str(&v).ok())
                .unwrap_or_default(),
        }
    }
}

/// Converts a decimal amount to minor units, rounding half-up to the cent.
pub fn to_minor_units(amount: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal::RoundingStrategy;
    (amount * Decimal::new(100, 0))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Converts minor units back to a decimal amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}
