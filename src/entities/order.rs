use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order entity.
///
/// `payment_reference` carries the gateway's checkout-session id and is the
/// idempotency key for order creation: the column is unique at the storage
/// layer, so concurrent finalization attempts collapse to one row.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub payment_reference: String,
    #[sea_orm(nullable)]
    pub user_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub guest_email: Option<String>,
    #[sea_orm(nullable)]
    pub guest_phone: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub gift_card_total: Decimal,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    #[sea_orm(nullable)]
    pub coupon_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub gift_card_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub shipping_name: Option<String>,
    #[sea_orm(nullable)]
    pub shipping_address: Option<String>,
    #[sea_orm(nullable)]
    pub shipping_city: Option<String>,
    #[sea_orm(nullable)]
    pub shipping_postal_code: Option<String>,
    #[sea_orm(nullable)]
    pub shipping_country: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Payment status, as reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

/// Fulfillment status, independent of payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}
