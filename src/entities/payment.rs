use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Payment attempt entity.
///
/// One row per gateway attempt, correlated 1:1 with the remote payment
/// object through `gateway_intent_id`. The unique index on that column is
/// what stops a duplicated create call from producing two rows for one
/// logical attempt. An order may accumulate several attempts; the
/// status-guarded updates in the payment service ensure at most one
/// reaches `succeeded`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub gateway: GatewayKind,
    #[sea_orm(unique)]
    pub gateway_intent_id: String,
    #[sea_orm(nullable)]
    pub gateway_charge_id: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    #[sea_orm(nullable)]
    pub payment_method: Option<String>,
    #[sea_orm(nullable)]
    pub card_brand: Option<String>,
    #[sea_orm(nullable)]
    pub card_last4: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub metadata: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub succeeded_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub failed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Which processor a payment row belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    #[sea_orm(string_value = "stripe")]
    Stripe,
    #[sea_orm(string_value = "razorpay")]
    Razorpay,
}

/// Local mirror of the gateway payment status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl PaymentStatus {
    /// States a success event must not be re-applied over.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Succeeded | Self::Refunded)
    }

    /// States that can still be refunded.
    pub fn is_refundable(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_states_block_success_replay() {
        assert!(PaymentStatus::Succeeded.is_settled());
        assert!(PaymentStatus::Refunded.is_settled());
        assert!(!PaymentStatus::Pending.is_settled());
        assert!(!PaymentStatus::Processing.is_settled());
        assert!(!PaymentStatus::Failed.is_settled());
    }

    #[test]
    fn only_succeeded_is_refundable() {
        assert!(PaymentStatus::Succeeded.is_refundable());
        assert!(!PaymentStatus::Pending.is_refundable());
        assert!(!PaymentStatus::Refunded.is_refundable());
    }
}
