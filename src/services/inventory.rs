use crate::{
    entities::{product, Product, ProductModel},
    errors::ServiceError,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Stock ledger: the only writer of `products.stock_quantity`.
///
/// Every decrement is a conditional UPDATE guarded by the current
/// quantity, so two checkouts racing for the last unit cannot both pass;
/// the loser sees zero rows affected and the surrounding transaction rolls
/// back. Restores are unconditional additions.
pub struct StockLedger;

impl StockLedger {
    /// Atomically takes `quantity` units from a product.
    ///
    /// Runs `UPDATE products SET stock_quantity = stock_quantity - ?
    /// WHERE id = ? AND stock_quantity >= ?` and requires exactly one
    /// affected row. Zero rows means the stock moved under us after
    /// validation; the caller aborts its transaction.
    #[instrument(skip(conn))]
    pub async fn decrement<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be positive".to_string(),
            ));
        }

        let result = Product::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(quantity),
            )
            .col_expr(
                product::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::StockQuantity.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected != 1 {
            counter!("storefront_stock.decrement_conflicts", 1);
            warn!(%product_id, quantity, "stock decrement lost the race");
            return Err(ServiceError::ConcurrencyConflict { product_id });
        }

        debug!(%product_id, quantity, "stock decremented");
        Ok(())
    }

    /// Returns `quantity` units to a product (order cancellation).
    #[instrument(skip(conn))]
    pub async fn restore<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be positive".to_string(),
            ));
        }

        let result = Product::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).add(quantity),
            )
            .col_expr(
                product::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;

        if result.rows_affected != 1 {
            // The product was deleted after the order was placed; the
            // snapshot keeps history but there is nothing to restore.
            warn!(%product_id, quantity, "stock restore skipped: product missing");
        } else {
            debug!(%product_id, quantity, "stock restored");
        }
        Ok(())
    }

    /// Loads a product, or `NotFound`.
    pub async fn get_product<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
    ) -> Result<ProductModel, ServiceError> {
        Product::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Validates that a product is purchasable at the requested quantity.
    /// Returns the product so callers can snapshot its fields.
    pub async fn check_availability<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        requested: i32,
    ) -> Result<ProductModel, ServiceError> {
        let product = Self::get_product(conn, product_id).await?;

        if !product.is_active {
            return Err(ServiceError::ProductUnavailable {
                product_id,
                name: product.name,
            });
        }

        if requested > product.stock_quantity {
            return Err(ServiceError::insufficient_stock(
                product_id,
                product.name,
                product.stock_quantity,
                requested,
            ));
        }

        Ok(product)
    }
}
