/// Storefront entities
pub mod cart;
pub mod cart_item;
pub mod category;
pub mod coupon;
pub mod coupon_usage;
pub mod gift_card;
pub mod gift_card_transaction;
pub mod order;
pub mod order_item;
pub mod product;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use category::{Entity as Category, Model as CategoryModel};
pub use coupon::{CouponScope, CouponType, Entity as Coupon, Model as CouponModel};
pub use coupon_usage::{Entity as CouponUsage, Model as CouponUsageModel};
pub use gift_card::{Entity as GiftCard, Model as GiftCardModel};
pub use gift_card_transaction::{Entity as GiftCardTransaction, Model as GiftCardTransactionModel};
pub use order::{Entity as Order, FulfillmentStatus, Model as OrderModel, PaymentStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
