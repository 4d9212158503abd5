use crate::{
    entities::{
        order, order_item, FulfillmentStatus, Order, OrderItem, OrderItemModel, OrderModel,
        PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    payments::{from_minor_units, CheckoutSession, PaymentGateway, SessionMetadata},
    services::{CartService, CouponService, GiftCardService},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const MAX_PAGE_SIZE: u64 = 100;

/// Order creation and retrieval.
///
/// Two independent callers race to create an order for a paid checkout
/// session: the gateway webhook and the storefront's post-redirect poll.
/// Finalization is idempotent per payment reference; the unique constraint
/// on `orders.payment_reference` is the arbiter, not application locking.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    carts: CartService,
    coupons: CouponService,
    gift_cards: GiftCardService,
    event_sender: Arc<EventSender>,
}

/// An order plus whether this call created it.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub order: OrderModel,
    pub created: bool,
}

/// A line ready to be frozen into an order item.
#[derive(Debug, Clone)]
struct OrderLine {
    product_id: Uuid,
    name: String,
    quantity: i32,
    unit_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        carts: CartService,
        coupons: CouponService,
        gift_cards: GiftCardService,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            carts,
            coupons,
            gift_cards,
            event_sender,
        }
    }

    /// Finalizes an order for a settled checkout session.
    ///
    /// Safe to call any number of times for the same session: the first
    /// caller creates the order, every later caller gets the existing one.
    #[instrument(skip(self, session), fields(payment_reference = %session.id))]
    pub async fn finalize_from_session(
        &self,
        session: &CheckoutSession,
    ) -> Result<FinalizeOutcome, ServiceError> {
        if !session.payment_status.is_settled() {
            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    payment_reference: session.id.clone(),
                })
                .await;
            return Err(ServiceError::PaymentFailed(
                "payment has not completed for this session".to_string(),
            ));
        }

        // Fast path: someone already finalized this session.
        if let Some(existing) = self.find_by_payment_reference(&session.id).await? {
            return Ok(self.already_finalized(existing).await);
        }

        let meta = SessionMetadata::from_map(&session.metadata);
        let coupon = match &meta.coupon_code {
            Some(code) => self.coupons.find_by_code(code).await?,
            None => None,
        };
        let gift_card = match &meta.gift_card_code {
            Some(code) => self.gift_cards.find_by_code(code).await?,
            None => None,
        };

        // An order without lines is unrecoverable, so the line source is
        // resolved before anything is inserted.
        let lines = self.resolve_line_source(&meta).await;
        if lines.is_empty() {
            error!(payment_reference = %session.id, "No line source for session; refusing to create an empty order");
            return Err(ServiceError::OrderError(
                "no line items available for this payment session".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let model = order::ActiveModel {
            id: Set(order_id),
            payment_reference: Set(session.id.clone()),
            user_id: Set(meta.user_id),
            guest_email: Set(meta.guest_email.clone().or_else(|| session.customer_email.clone())),
            guest_phone: Set(meta.guest_phone.clone()),
            amount_total: Set(from_minor_units(session.amount_total)),
            discount_total: Set(meta.coupon_discount.unwrap_or(Decimal::ZERO)),
            gift_card_total: Set(meta.gift_card_amount.unwrap_or(Decimal::ZERO)),
            currency: Set(session.currency.clone()),
            payment_status: Set(PaymentStatus::Paid),
            fulfillment_status: Set(FulfillmentStatus::Pending),
            coupon_id: Set(coupon.as_ref().map(|c| c.id)),
            gift_card_id: Set(gift_card.as_ref().map(|c| c.id)),
            shipping_name: Set(meta.shipping_name.clone()),
            shipping_address: Set(meta.shipping_address.clone()),
            shipping_city: Set(meta.shipping_city.clone()),
            shipping_postal_code: Set(meta.shipping_postal_code.clone()),
            shipping_country: Set(meta.shipping_country.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // The insert stands alone. Everything after it (items, cart cleanup,
        // discount bookkeeping) is best-effort against the persisted order,
        // so a partial failure never voids a paid order.
        let order = match model.insert(&*self.db).await {
            Ok(order) => order,
            Err(err) if ServiceError::is_unique_violation(&err) => {
                // Lost the race: the other finalizer's row is the order.
                let existing = self
                    .find_by_payment_reference(&session.id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(format!(
                            "order for {} vanished after unique violation",
                            session.id
                        ))
                    })?;
                return Ok(self.already_finalized(existing).await);
            }
            Err(err) => return Err(err.into()),
        };

        self.attach_items(&order, lines).await;
        self.cleanup_cart(&meta).await;
        self.record_discounts(&order, &meta, coupon.map(|c| c.id), gift_card.map(|c| c.id))
            .await;

        metrics::ORDERS_FINALIZED.inc();
        info!(order_id = %order.id, payment_reference = %order.payment_reference, "Order finalized");
        self.event_sender.send_or_log(Event::OrderCreated(order.id)).await;
        self.event_sender
            .send_or_log(Event::PaymentSucceeded {
                payment_reference: order.payment_reference.clone(),
            })
            .await;

        Ok(FinalizeOutcome {
            order,
            created: true,
        })
    }

    /// Finalizes by payment reference, fetching the session from the gateway
    /// when no order exists yet. This is the storefront's post-redirect
    /// fallback for when the webhook is delayed or lost.
    #[instrument(skip(self))]
    pub async fn finalize_by_reference(
        &self,
        payment_reference: &str,
    ) -> Result<FinalizeOutcome, ServiceError> {
        if let Some(existing) = self.find_by_payment_reference(payment_reference).await? {
            return Ok(self.already_finalized(existing).await);
        }

        let session = self
            .gateway
            .retrieve_checkout_session(payment_reference)
            .await?;
        self.finalize_from_session(&session).await
    }

    pub async fn find_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Order::find()
            .filter(order::Column::PaymentReference.eq(payment_reference))
            .one(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    /// Order plus its lines, by payment reference.
    #[instrument(skip(self))]
    pub async fn get_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = self
            .find_by_payment_reference(payment_reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound("order".to_string()))?;
        let items = self.items_for(order.id).await?;
        Ok((order, items))
    }

    /// Lists a user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);

        let paginator = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Fetches one of the user's orders with its lines. An order belonging
    /// to someone else is reported as not found, not forbidden.
    #[instrument(skip(self))]
    pub async fn get_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| o.user_id == Some(user_id))
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;
        let items = self.items_for(order.id).await?;
        Ok((order, items))
    }

    pub async fn items_for(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError> {
        OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    async fn already_finalized(&self, order: OrderModel) -> FinalizeOutcome {
        metrics::DUPLICATE_FINALIZATIONS.inc();
        self.event_sender
            .send_or_log(Event::OrderAlreadyFinalized {
                order_id: order.id,
                payment_reference: order.payment_reference.clone(),
            })
            .await;
        FinalizeOutcome {
            order,
            created: false,
        }
    }

    /// Resolves the order's lines: from the live cart when it still exists,
    /// otherwise from the line snapshot carried in session metadata. Empty
    /// means there is nothing to build an order from.
    async fn resolve_line_source(&self, meta: &SessionMetadata) -> Vec<OrderLine> {
        if let Some(cart_id) = meta.cart_id {
            match self.carts.priced_lines(cart_id).await {
                Ok(lines) if !lines.is_empty() => {
                    return lines
                        .into_iter()
                        .map(|line| OrderLine {
                            product_id: line.product_id,
                            name: line.name,
                            quantity: line.quantity,
                            unit_price: line.unit_price,
                        })
                        .collect();
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(cart_id = %cart_id, %err, "Could not read cart lines; using metadata snapshot");
                }
            }
        }

        meta.items
            .iter()
            .map(|item| OrderLine {
                product_id: item.product_id,
                name: item.name.clone(),
                quantity: item.quantity as i32,
                unit_price: from_minor_units(item.unit_amount),
            })
            .collect()
    }

    async fn attach_items(&self, order: &OrderModel, lines: Vec<OrderLine>) {
        for line in lines {
            let row = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(Some(line.product_id)),
                product_name: Set(line.name),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                created_at: Set(Utc::now()),
            };
            if let Err(err) = row.insert(&*self.db).await {
                // The order row is the source of truth; a failed line insert
                // is reconciled manually, never unwound.
                error!(order_id = %order.id, %err, "Failed to insert order item");
            }
        }
    }

    async fn cleanup_cart(&self, meta: &SessionMetadata) {
        if let Some(cart_id) = meta.cart_id {
            if let Err(err) = self.carts.clear_cart_by_id(cart_id).await {
                warn!(cart_id = %cart_id, %err, "Failed to clear cart after order creation");
            }
        }
    }

    async fn record_discounts(
        &self,
        order: &OrderModel,
        meta: &SessionMetadata,
        coupon_id: Option<Uuid>,
        gift_card_id: Option<Uuid>,
    ) {
        if let (Some(coupon_id), Some(amount)) = (coupon_id, meta.coupon_discount) {
            match self
                .coupons
                .record_usage(coupon_id, order.user_id, order.id, amount)
                .await
            {
                Ok(()) => {
                    self.event_sender
                        .send_or_log(Event::CouponRedeemed {
                            coupon_id,
                            order_id: order.id,
                            amount,
                        })
                        .await;
                }
                Err(err) => {
                    error!(order_id = %order.id, coupon_id = %coupon_id, %err, "Failed to record coupon usage");
                }
            }
        }

        if let (Some(gift_card_id), Some(amount)) = (gift_card_id, meta.gift_card_amount) {
            match self.gift_cards.redeem(gift_card_id, order.id, amount).await {
                Ok(deducted) => {
                    self.event_sender
                        .send_or_log(Event::GiftCardRedeemed {
                            gift_card_id,
                            order_id: order.id,
                            amount: deducted,
                        })
                        .await;
                }
                Err(err) => {
                    error!(order_id = %order.id, gift_card_id = %gift_card_id, %err, "Failed to redeem gift card");
                }
            }
        }
    }
}
