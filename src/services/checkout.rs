use crate::{
    auth::Shopper,
    config::AppConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    payments::{
        to_minor_units, CreateSessionRequest, MetadataItem, PaymentGateway, SessionLineItem,
        SessionMetadata,
    },
    services::{
        carts::PricedCartLine, gift_cards::applicable_amount, CartService, CouponService,
        GiftCardService,
    },
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Orchestrates checkout: prices the cart, applies discounts, and opens a
/// hosted payment session carrying everything needed to finalize the order
/// later.
#[derive(Clone)]
pub struct CheckoutService {
    config: Arc<AppConfig>,
    gateway: Arc<dyn PaymentGateway>,
    carts: CartService,
    coupons: CouponService,
    gift_cards: GiftCardService,
    event_sender: Arc<EventSender>,
}

#[derive(Debug, Clone, Default)]
pub struct StartCheckoutInput {
    pub coupon_code: Option<String>,
    pub gift_card_code: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub shipping_name: Option<String>,
    pub shipping_address: Option<String>,
    pub shipping_city: Option<String>,
    pub shipping_postal_code: Option<String>,
    pub shipping_country: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStartResult {
    /// Gateway session id; becomes the order's payment reference
    pub payment_reference: String,
    /// Hosted payment page to redirect the shopper to
    pub checkout_url: Option<String>,
    pub subtotal: Decimal,
    pub coupon_discount: Decimal,
    pub gift_card_amount: Decimal,
    /// What the card will actually be charged
    pub payable: Decimal,
}

impl CheckoutService {
    pub fn new(
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        carts: CartService,
        coupons: CouponService,
        gift_cards: GiftCardService,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            config,
            gateway,
            carts,
            coupons,
            gift_cards,
            event_sender,
        }
    }

    #[instrument(skip(self, shopper, input))]
    pub async fn start(
        &self,
        shopper: &Shopper,
        input: StartCheckoutInput,
    ) -> Result<CheckoutStartResult, ServiceError> {
        let cart = self
            .carts
            .resolve_cart(shopper)
            .await?
            .ok_or_else(|| ServiceError::InvalidOperation("cart is empty".to_string()))?;

        let lines = self.carts.priced_lines(cart.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::InvalidOperation("cart is empty".to_string()));
        }
        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();

        if !shopper.is_authenticated() && input.guest_email.as_deref().unwrap_or("").is_empty() {
            return Err(ServiceError::ValidationError(
                "guest checkout requires an email address".to_string(),
            ));
        }

        let coupon_quote = match &input.coupon_code {
            Some(code) if !code.trim().is_empty() => Some(
                self.coupons
                    .validate_for_cart(code, &lines, subtotal, shopper.user_id)
                    .await?,
            ),
            _ => None,
        };
        let coupon_discount = coupon_quote.as_ref().map_or(Decimal::ZERO, |q| q.discount);

        let after_coupon = (subtotal - coupon_discount).max(Decimal::ZERO);
        let gift_card = match &input.gift_card_code {
            Some(code) if !code.trim().is_empty() => {
                Some(self.gift_cards.validate(code).await?)
            }
            _ => None,
        };
        let gift_card_amount = gift_card
            .as_ref()
            .map_or(Decimal::ZERO, |card| applicable_amount(card, after_coupon));

        let payable = (after_coupon - gift_card_amount).max(Decimal::ZERO);

        let metadata = SessionMetadata {
            user_id: shopper.user_id,
            cart_session_token: shopper.session_token.clone(),
            cart_id: Some(cart.id),
            guest_email: input.guest_email.clone(),
            guest_phone: input.guest_phone.clone(),
            coupon_code: coupon_quote.as_ref().map(|q| q.coupon.code.clone()),
            coupon_discount: coupon_quote.as_ref().map(|q| q.discount),
            gift_card_code: gift_card.as_ref().map(|c| c.code.clone()),
            gift_card_amount: gift_card.as_ref().map(|_| gift_card_amount),
            shipping_name: input.shipping_name,
            shipping_address: input.shipping_address,
            shipping_city: input.shipping_city,
            shipping_postal_code: input.shipping_postal_code,
            shipping_country: input.shipping_country,
            items: lines.iter().map(metadata_item).collect(),
        };

        let request = CreateSessionRequest {
            line_items: lines.iter().map(session_line_item).collect(),
            currency: self.config.currency.clone(),
            discount_amount: to_minor_units(coupon_discount + gift_card_amount),
            customer_email: input.guest_email,
            success_url: self.config.checkout_success_url(),
            cancel_url: self.config.checkout_cancel_url(),
            metadata: metadata.to_map(),
        };

        let session = self.gateway.create_checkout_session(request).await?;

        metrics::CHECKOUT_SESSIONS_CREATED.inc();
        info!(
            cart_id = %cart.id,
            payment_reference = %session.id,
            %subtotal,
            %coupon_discount,
            %gift_card_amount,
            %payable,
            "Checkout session created"
        );
        self.event_sender
            .send_or_log(Event::CheckoutStarted {
                cart_id: cart.id,
                payment_reference: session.id.clone(),
            })
            .await;

        Ok(CheckoutStartResult {
            payment_reference: session.id,
            checkout_url: session.url,
            subtotal,
            coupon_discount,
            gift_card_amount,
            payable,
        })
    }
}

fn session_line_item(line: &PricedCartLine) -> SessionLineItem {
    SessionLineItem {
        product_id: line.product_id,
        name: line.name.clone(),
        unit_amount: to_minor_units(line.unit_price),
        quantity: line.quantity as i64,
    }
}

fn metadata_item(line: &PricedCartLine) -> MetadataItem {
    MetadataItem {
        product_id: line.product_id,
        name: line.name.clone(),
        quantity: line.quantity as i64,
        unit_amount: to_minor_units(line.unit_price),
    }
}
