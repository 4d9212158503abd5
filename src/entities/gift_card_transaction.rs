use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only ledger row for a gift-card redemption; `balance_after`
/// records the remaining amount at the time of the debit for auditability.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gift_card_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub gift_card_id: Uuid,
    pub order_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::gift_card::Entity",
        from = "Column::GiftCardId",
        to = "super::gift_card::Column::Id"
    )]
    GiftCard,
}

impl Related<super::gift_card::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GiftCard.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
