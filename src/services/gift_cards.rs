use crate::{
    entities::{gift_card, gift_card_transaction, GiftCard, GiftCardModel},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Gift card validation and redemption.
#[derive(Clone)]
pub struct GiftCardService {
    db: Arc<DatabaseConnection>,
}

impl GiftCardService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<GiftCardModel>, ServiceError> {
        GiftCard::find()
            .filter(gift_card::Column::Code.eq(code.trim().to_uppercase()))
            .one(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    /// Validates a gift card for use at checkout and returns it with its
    /// spendable balance.
    #[instrument(skip(self))]
    pub async fn validate(&self, code: &str) -> Result<GiftCardModel, ServiceError> {
        let card = self
            .find_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::GiftCardRejected("Invalid gift card code".to_string()))?;

        let now = Utc::now();
        if !card.active {
            return Err(ServiceError::GiftCardRejected(
                "This gift card is no longer active".to_string(),
            ));
        }
        if card.starts_at > now {
            return Err(ServiceError::GiftCardRejected(
                "This gift card is not yet active".to_string(),
            ));
        }
        if card.expires_at.is_some_and(|exp| exp < now) {
            return Err(ServiceError::GiftCardRejected(
                "This gift card has expired".to_string(),
            ));
        }
        if card.remaining_amount <= Decimal::ZERO {
            return Err(ServiceError::GiftCardRejected(
                "This gift card has no remaining balance".to_string(),
            ));
        }
        Ok(card)
    }

    /// Deducts `amount` from the card and appends a transaction row.
    ///
    /// The decrement is a single-row column expression guarded on the
    /// balance still covering the deduction, so concurrent redemptions
    /// cannot lose an update or drive the balance negative. When the guard
    /// fails (a concurrent redemption shrank the balance first) the
    /// deduction is re-clamped against the fresh balance.
    #[instrument(skip(self))]
    pub async fn redeem(
        &self,
        gift_card_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    ) -> Result<Decimal, ServiceError> {
        let card = GiftCard::find_by_id(gift_card_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("gift card {}", gift_card_id)))?;

        let mut deducted = amount.min(card.remaining_amount).max(Decimal::ZERO);

        let result = GiftCard::update_many()
            .col_expr(
                gift_card::Column::RemainingAmount,
                Expr::col(gift_card::Column::RemainingAmount).sub(deducted),
            )
            .col_expr(gift_card::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(gift_card::Column::Id.eq(gift_card_id))
            .filter(gift_card::Column::RemainingAmount.gte(deducted))
            .exec(&*self.db)
            .await?;

        let balance_after = if result.rows_affected > 0 {
            GiftCard::find_by_id(gift_card_id)
                .one(&*self.db)
                .await?
                .map(|c| c.remaining_amount)
                .unwrap_or(card.remaining_amount - deducted)
        } else {
            warn!(
                gift_card_id = %gift_card_id,
                "Guarded balance decrement matched no rows; re-clamping against the current balance"
            );
            let current = GiftCard::find_by_id(gift_card_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("gift card {}", gift_card_id)))?;
            deducted = amount.min(current.remaining_amount).max(Decimal::ZERO);
            let after = current.remaining_amount - deducted;

            let mut active: gift_card::ActiveModel = current.into();
            active.remaining_amount = Set(after);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;
            after
        };

        let txn = gift_card_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            gift_card_id: Set(gift_card_id),
            order_id: Set(order_id),
            amount: Set(deducted),
            balance_after: Set(balance_after),
            created_at: Set(Utc::now()),
        };
        txn.insert(&*self.db).await?;

        info!(
            gift_card_id = %gift_card_id,
            order_id = %order_id,
            deducted = %deducted,
            balance_after = %balance_after,
            "Gift card redeemed"
        );
        Ok(deducted)
    }
}

/// Portion of an order total a gift card can cover: its remaining balance,
/// clamped to what is still owed.
pub fn applicable_amount(card: &GiftCardModel, amount_due: Decimal) -> Decimal {
    card.remaining_amount.min(amount_due).max(Decimal::ZERO)
}
