use crate::{
    auth::Shopper,
    entities::{cart, cart_item, product, Cart, CartItem, CartModel, Product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const MAX_LINE_QUANTITY: i32 = 999;

/// Shopping cart service.
///
/// Carts belong to exactly one owner: an authenticated user id or a guest
/// session token. A shopper who logs in mid-session starts from their user
/// cart; the guest cart is left behind, never merged.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// One cart line priced against the current catalog.
#[derive(Debug, Clone, Serialize)]
pub struct PricedCartLine {
    pub product_id: Uuid,
    pub name: String,
    pub category_id: Option<Uuid>,
    pub image_url: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// A cart as returned to the storefront: priced lines plus subtotal.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub cart_id: Option<Uuid>,
    pub items: Vec<PricedCartLine>,
    pub subtotal: Decimal,
    pub item_count: i32,
}

impl CartView {
    pub fn empty() -> Self {
        Self {
            cart_id: None,
            items: Vec::new(),
            subtotal: Decimal::ZERO,
            item_count: 0,
        }
    }
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Finds the shopper's cart, if one exists. Authenticated identity wins
    /// over the guest cookie when both are present.
    #[instrument(skip(self, shopper))]
    pub async fn resolve_cart(&self, shopper: &Shopper) -> Result<Option<CartModel>, ServiceError> {
        if let Some(user_id) = shopper.user_id {
            return Cart::find()
                .filter(cart::Column::UserId.eq(user_id))
                .one(&*self.db)
                .await
                .map_err(ServiceError::from);
        }
        if let Some(token) = &shopper.session_token {
            return Cart::find()
                .filter(cart::Column::SessionToken.eq(token.clone()))
                .one(&*self.db)
                .await
                .map_err(ServiceError::from);
        }
        Ok(None)
    }

    /// Finds or creates the shopper's cart. The caller must have an owner
    /// identity; handlers mint a guest session token before calling this.
    #[instrument(skip(self, shopper))]
    pub async fn resolve_or_create_cart(&self, shopper: &Shopper) -> Result<CartModel, ServiceError> {
        if let Some(existing) = self.resolve_cart(shopper).await? {
            return Ok(existing);
        }
        if shopper.is_anonymous() {
            return Err(ServiceError::InvalidOperation(
                "cannot create a cart without an owner".to_string(),
            ));
        }

        let now = Utc::now();
        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(shopper.user_id),
            session_token: Set(shopper.session_token.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let created = model.insert(&*self.db).await?;

        info!(cart_id = %created.id, authenticated = shopper.is_authenticated(), "Cart created");
        self.event_sender.send_or_log(Event::CartCreated(created.id)).await;
        Ok(created)
    }

    /// Adds a product to the shopper's cart, creating the cart if needed.
    /// Adding a product already in the cart increments its quantity.
    #[instrument(skip(self, shopper))]
    pub async fn add_item(
        &self,
        shopper: &Shopper,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| ServiceError::NotFound(format!("product {}", product_id)))?;

        let cart = self.resolve_or_create_cart(shopper).await?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .one(&*self.db)
            .await?;

        match existing {
            Some(line) => {
                let new_quantity = (line.quantity + quantity).min(MAX_LINE_QUANTITY);
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(new_quantity);
                active.updated_at = Set(Utc::now());
                active.update(&*self.db).await?;
            }
            None => {
                let now = Utc::now();
                let line = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    quantity: Set(quantity.min(MAX_LINE_QUANTITY)),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                line.insert(&*self.db).await?;
            }
        }

        self.touch_cart(&cart).await?;
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id: product.id,
            })
            .await;

        self.cart_view(&cart).await
    }

    /// Sets the quantity of a cart line. Zero removes the line.
    #[instrument(skip(self, shopper))]
    pub async fn update_item_quantity(
        &self,
        shopper: &Shopper,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "quantity cannot be negative".to_string(),
            ));
        }

        let cart = self
            .resolve_cart(shopper)
            .await?
            .ok_or_else(|| ServiceError::NotFound("cart".to_string()))?;

        let line = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart item {}", product_id)))?;

        if quantity == 0 {
            line.delete(&*self.db).await?;
            self.event_sender
                .send_or_log(Event::CartItemRemoved {
                    cart_id: cart.id,
                    product_id,
                })
                .await;
        } else {
            let mut active: cart_item::ActiveModel = line.into();
            active.quantity = Set(quantity.min(MAX_LINE_QUANTITY));
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;
            self.event_sender
                .send_or_log(Event::CartItemUpdated {
                    cart_id: cart.id,
                    product_id,
                })
                .await;
        }

        self.touch_cart(&cart).await?;
        self.cart_view(&cart).await
    }

    /// Returns the shopper's cart priced against the catalog. A shopper
    /// without a cart gets an empty view, not an error.
    #[instrument(skip(self, shopper))]
    pub async fn get_cart(&self, shopper: &Shopper) -> Result<CartView, ServiceError> {
        match self.resolve_cart(shopper).await? {
            Some(cart) => self.cart_view(&cart).await,
            None => Ok(CartView::empty()),
        }
    }

    /// Removes every line from the shopper's cart. The cart row itself is
    /// kept so the owner binding (and cookie) stays valid.
    #[instrument(skip(self, shopper))]
    pub async fn clear_cart(&self, shopper: &Shopper) -> Result<CartView, ServiceError> {
        let Some(cart) = self.resolve_cart(shopper).await? else {
            return Ok(CartView::empty());
        };

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&*self.db)
            .await?;
        self.touch_cart(&cart).await?;

        info!(cart_id = %cart.id, "Cart cleared");
        self.event_sender.send_or_log(Event::CartCleared(cart.id)).await;
        self.cart_view(&cart).await
    }

    /// Prices a cart's lines against the current catalog. Lines whose
    /// product has been removed or deactivated are skipped with a warning.
    #[instrument(skip(self))]
    pub async fn priced_lines(&self, cart_id: Uuid) -> Result<Vec<PricedCartLine>, ServiceError> {
        let rows: Vec<(cart_item::Model, Option<product::Model>)> = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        let mut lines = Vec::with_capacity(rows.len());
        for (item, product) in rows {
            let Some(product) = product.filter(|p| p.active) else {
                warn!(cart_id = %cart_id, product_id = %item.product_id, "Skipping cart line with unavailable product");
                continue;
            };
            let quantity = item.quantity;
            let line_total = product.price * Decimal::from(quantity);
            lines.push(PricedCartLine {
                product_id: product.id,
                name: product.name,
                category_id: product.category_id,
                image_url: product.image_url,
                quantity,
                unit_price: product.price,
                line_total,
            });
        }
        Ok(lines)
    }

    pub async fn cart_view(&self, cart: &CartModel) -> Result<CartView, ServiceError> {
        let items = self.priced_lines(cart.id).await?;
        let subtotal = items.iter().map(|l| l.line_total).sum();
        let item_count = items.iter().map(|l| l.quantity).sum();
        Ok(CartView {
            cart_id: Some(cart.id),
            items,
            subtotal,
            item_count,
        })
    }

    /// Deletes every line of a cart by id. Used by order finalization after
    /// an order is created from the cart.
    pub async fn clear_cart_by_id(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    async fn touch_cart(&self, cart: &CartModel) -> Result<(), ServiceError> {
        let mut active: cart::ActiveModel = cart.clone().into();
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        Ok(())
    }
}
