pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod coupons;
pub mod gift_cards;
pub mod orders;

pub use carts::CartService;
pub use catalog::CatalogService;
pub use checkout::CheckoutService;
pub use coupons::CouponService;
pub use gift_cards::GiftCardService;
pub use orders::OrderService;
