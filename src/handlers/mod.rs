pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod common;
pub mod coupons;
pub mod gift_cards;
pub mod orders;
pub mod webhooks;

use crate::services::{
    CartService, CatalogService, CheckoutService, CouponService, GiftCardService, OrderService,
};

/// All application services, grouped for handler access through `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub carts: CartService,
    pub catalog: CatalogService,
    pub coupons: CouponService,
    pub gift_cards: GiftCardService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
}
