use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coupon entity.
///
/// `usage_count` is the only mutable counter; it is incremented with a
/// single-row column expression so concurrent redemptions rely on the
/// store's per-row atomicity rather than application locking.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    pub coupon_type: CouponType,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_value: Decimal,
    #[sea_orm(nullable, column_type = "Decimal(Some((19, 4)))")]
    pub max_discount_amount: Option<Decimal>,
    #[sea_orm(nullable, column_type = "Decimal(Some((19, 4)))")]
    pub min_purchase_amount: Option<Decimal>,
    pub starts_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub expires_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub usage_limit: Option<i32>,
    #[sea_orm(nullable)]
    pub per_user_limit: Option<i32>,
    pub first_order_only: bool,
    pub scope: CouponScope,
    /// JSON array of product ids; consulted when `scope` is `Products`.
    #[sea_orm(column_type = "Json", nullable)]
    pub product_ids: Option<Json>,
    /// JSON array of category ids; consulted when `scope` is `Categories`.
    #[sea_orm(column_type = "Json", nullable)]
    pub category_ids: Option<Json>,
    pub usage_count: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_usage::Entity")]
    Usages,
}

impl Related<super::coupon_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Product ids the coupon is scoped to, empty unless scope is `Products`.
    pub fn scoped_product_ids(&self) -> Vec<Uuid> {
        parse_id_list(self.product_ids.as_ref())
    }

    /// Category ids the coupon is scoped to, empty unless scope is `Categories`.
    pub fn scoped_category_ids(&self) -> Vec<Uuid> {
        parse_id_list(self.category_ids.as_ref())
    }
}

fn parse_id_list(value: Option<&Json>) -> Vec<Uuid> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum CouponType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed_amount")]
    FixedAmount,
}

/// Which cart lines count toward the discount base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum CouponScope {
    #[sea_orm(string_value = "all")]
    All,
    #[sea_orm(string_value = "products")]
    Products,
    #[sea_orm(string_value = "categories")]
    Categories,
}
