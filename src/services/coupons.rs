use crate::{
    entities::{
        coupon, coupon_usage, order, Coupon, CouponModel, CouponScope, CouponType, CouponUsage,
        Order,
    },
    errors::ServiceError,
    services::carts::PricedCartLine,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Coupon validation and redemption bookkeeping.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

/// A coupon that passed validation, with its discount quoted against a cart.
#[derive(Debug, Clone)]
pub struct CouponQuote {
    pub coupon: CouponModel,
    /// Subtotal of the cart lines the coupon's scope covers
    pub eligible_subtotal: Decimal,
    pub discount: Decimal,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<CouponModel>, ServiceError> {
        Coupon::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    /// Validates a coupon against a cart and quotes the discount.
    ///
    /// Checks run in a fixed order and each failure carries its own
    /// user-facing message, so the storefront can show exactly why the code
    /// was refused.
    #[instrument(skip(self, lines))]
    pub async fn validate_for_cart(
        &self,
        code: &str,
        lines: &[PricedCartLine],
        subtotal: Decimal,
        user_id: Option<Uuid>,
    ) -> Result<CouponQuote, ServiceError> {
        let coupon = self
            .find_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::CouponRejected("Invalid coupon code".to_string()))?;

        let now = Utc::now();
        if !coupon.active {
            return Err(ServiceError::CouponRejected(
                "This coupon is no longer active".to_string(),
            ));
        }
        if coupon.starts_at > now {
            return Err(ServiceError::CouponRejected(
                "This coupon is not yet active".to_string(),
            ));
        }
        if coupon.expires_at.is_some_and(|exp| exp < now) {
            return Err(ServiceError::CouponRejected(
                "This coupon has expired".to_string(),
            ));
        }
        if coupon
            .usage_limit
            .is_some_and(|limit| coupon.usage_count >= limit)
        {
            return Err(ServiceError::CouponRejected(
                "This coupon has already been used".to_string(),
            ));
        }

        if let (Some(limit), Some(user_id)) = (coupon.per_user_limit, user_id) {
            let used = CouponUsage::find()
                .filter(coupon_usage::Column::CouponId.eq(coupon.id))
                .filter(coupon_usage::Column::UserId.eq(user_id))
                .count(&*self.db)
                .await?;
            if used >= limit as u64 {
                return Err(ServiceError::CouponRejected(
                    "You have already used this coupon".to_string(),
                ));
            }
        }

        // First-order checks need an identity; guests are taken at their word.
        if coupon.first_order_only {
            if let Some(user_id) = user_id {
                let orders = Order::find()
                    .filter(order::Column::UserId.eq(user_id))
                    .count(&*self.db)
                    .await?;
                if orders > 0 {
                    return Err(ServiceError::CouponRejected(
                        "This coupon is only valid on your first order".to_string(),
                    ));
                }
            }
        }

        // The minimum-purchase threshold is judged against the full cart
        // subtotal, before the scope narrows the discount base.
        if let Some(min) = coupon.min_purchase_amount {
            if subtotal < min {
                return Err(ServiceError::CouponRejected(format!(
                    "A minimum purchase of {} is required to use this coupon",
                    min
                )));
            }
        }

        let eligible_subtotal = eligible_subtotal(&coupon, lines);
        if eligible_subtotal <= Decimal::ZERO {
            return Err(ServiceError::CouponRejected(
                "This coupon does not apply to any items in your cart".to_string(),
            ));
        }

        let discount = compute_discount(&coupon, eligible_subtotal);
        Ok(CouponQuote {
            coupon,
            eligible_subtotal,
            discount,
        })
    }

    /// Records a redemption: appends a usage row and bumps the usage counter
    /// with a single-row column expression. Falls back to read-modify-write
    /// if the expression update touches no rows.
    #[instrument(skip(self))]
    pub async fn record_usage(
        &self,
        coupon_id: Uuid,
        user_id: Option<Uuid>,
        order_id: Uuid,
        amount: Decimal,
    ) -> Result<(), ServiceError> {
        let usage = coupon_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon_id),
            user_id: Set(user_id),
            order_id: Set(order_id),
            amount: Set(amount),
            created_at: Set(Utc::now()),
        };
        usage.insert(&*self.db).await?;

        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(coupon_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(coupon_id = %coupon_id, "Usage counter update matched no rows; retrying read-modify-write");
            if let Some(model) = Coupon::find_by_id(coupon_id).one(&*self.db).await? {
                let count = model.usage_count;
                let mut active: coupon::ActiveModel = model.into();
                active.usage_count = Set(count + 1);
                active.updated_at = Set(Utc::now());
                active.update(&*self.db).await?;
            }
        }
        Ok(())
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Subtotal of the cart lines a coupon's scope covers.
pub fn eligible_subtotal(coupon: &CouponModel, lines: &[PricedCartLine]) -> Decimal {
    match coupon.scope {
        CouponScope::All => lines.iter().map(|l| l.line_total).sum(),
        CouponScope::Products => {
            let ids = coupon.scoped_product_ids();
            lines
                .iter()
                .filter(|l| ids.contains(&l.product_id))
                .map(|l| l.line_total)
                .sum()
        }
        CouponScope::Categories => {
            let ids = coupon.scoped_category_ids();
            lines
                .iter()
                .filter(|l| l.category_id.is_some_and(|c| ids.contains(&c)))
                .map(|l| l.line_total)
                .sum()
        }
    }
}

/// Computes the discount a coupon grants over an eligible subtotal.
///
/// Percentage discounts are capped at `max_discount_amount` when set; every
/// discount is clamped so it can never exceed the eligible subtotal. Rounded
/// to the cent, half-up.
pub fn compute_discount(coupon: &CouponModel, eligible_subtotal: Decimal) -> Decimal {
    if eligible_subtotal <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let raw = match coupon.coupon_type {
        CouponType::Percentage => {
            let pct = eligible_subtotal * coupon.discount_value / Decimal::from(100);
            match coupon.max_discount_amount {
                Some(cap) => pct.min(cap),
                None => pct,
            }
        }
        CouponType::FixedAmount => coupon.discount_value,
    };

    raw.min(eligible_subtotal)
        .max(Decimal::ZERO)
        .round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn coupon(coupon_type: CouponType, value: Decimal) -> CouponModel {
        CouponModel {
            id: Uuid::new_v4(),
            code: "TEST".into(),
            description: None,
            coupon_type,
            discount_value: value,
            max_discount_amount: None,
            min_purchase_amount: None,
            starts_at: Utc::now(),
            expires_at: None,
            usage_limit: None,
            per_user_limit: None,
            first_order_only: false,
            scope: CouponScope::All,
            product_ids: None,
            category_ids: None,
            usage_count: 0,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(product_id: Uuid, category_id: Option<Uuid>, total: Decimal) -> PricedCartLine {
        PricedCartLine {
            product_id,
            name: "item".into(),
            category_id,
            image_url: None,
            quantity: 1,
            unit_price: total,
            line_total: total,
        }
    }

    #[test]
    fn twenty_percent_off_fifty_is_ten() {
        let c = coupon(CouponType::Percentage, dec!(20));
        assert_eq!(compute_discount(&c, dec!(50.00)), dec!(10.00));
    }

    #[test]
    fn percentage_discount_honors_cap() {
        let mut c = coupon(CouponType::Percentage, dec!(50));
        c.max_discount_amount = Some(dec!(5.00));
        assert_eq!(compute_discount(&c, dec!(100.00)), dec!(5.00));
    }

    #[test]
    fn fixed_discount_is_clamped_to_eligible_subtotal() {
        let c = coupon(CouponType::FixedAmount, dec!(15.00));
        assert_eq!(compute_discount(&c, dec!(50.00)), dec!(15.00));
        assert_eq!(compute_discount(&c, dec!(10.00)), dec!(10.00));
    }

    #[test]
    fn discount_rounds_to_the_cent() {
        let c = coupon(CouponType::Percentage, dec!(33));
        // 33% of 9.99 = 3.2967 -> 3.30
        assert_eq!(compute_discount(&c, dec!(9.99)), dec!(3.30));
    }

    #[test]
    fn zero_eligible_subtotal_gives_zero_discount() {
        let c = coupon(CouponType::Percentage, dec!(20));
        assert_eq!(compute_discount(&c, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn product_scope_limits_the_base() {
        let in_scope = Uuid::new_v4();
        let out_of_scope = Uuid::new_v4();
        let mut c = coupon(CouponType::Percentage, dec!(10));
        c.scope = CouponScope::Products;
        c.product_ids = Some(serde_json::json!([in_scope.to_string()]));

        let lines = vec![
            line(in_scope, None, dec!(30.00)),
            line(out_of_scope, None, dec!(70.00)),
        ];
        assert_eq!(eligible_subtotal(&c, &lines), dec!(30.00));
    }

    #[test]
    fn category_scope_limits_the_base() {
        let cat = Uuid::new_v4();
        let mut c = coupon(CouponType::FixedAmount, dec!(5));
        c.scope = CouponScope::Categories;
        c.category_ids = Some(serde_json::json!([cat.to_string()]));

        let lines = vec![
            line(Uuid::new_v4(), Some(cat), dec!(20.00)),
            line(Uuid::new_v4(), Some(Uuid::new_v4()), dec!(80.00)),
            line(Uuid::new_v4(), None, dec!(15.00)),
        ];
        assert_eq!(eligible_subtotal(&c, &lines), dec!(20.00));
    }

    #[test]
    fn codes_are_normalized() {
        assert_eq!(normalize_code("  save20 "), "SAVE20");
    }
}
