use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prepaid gift card.
///
/// Invariant: `0 <= remaining_amount <= initial_amount`; redemptions clamp
/// at zero and the balance never increases.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gift_cards")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub initial_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub remaining_amount: Decimal,
    pub starts_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::gift_card_transaction::Entity")]
    Transactions,
}

impl Related<super::gift_card_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
