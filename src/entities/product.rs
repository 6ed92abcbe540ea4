use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Product entity.
///
/// `stock_quantity` is the single contended resource in the system; it is
/// only ever written through the stock ledger's conditional updates and a
/// CHECK constraint keeps it non-negative. `low_stock_threshold` is
/// advisory metadata used for alerting, never an invariant.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub slug: String,
    #[sea_orm(nullable)]
    pub sku: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub price: Decimal,
    pub stock_quantity: i32,
    pub low_stock_threshold: i32,
    #[sea_orm(nullable)]
    pub image_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the product has any units left.
    pub fn in_stock(&self) -> bool {
        self.stock_quantity > 0
    }

    /// Advisory low-stock check used for alerting.
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity > 0 && self.stock_quantity <= self.low_stock_threshold
    }
}
