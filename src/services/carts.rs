use crate::{
    entities::{cart, cart_item, Cart, CartItem, CartItemModel, CartModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory::StockLedger,
};
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// The identity a cart belongs to: an authenticated user or a guest
/// session, never both and never neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwner {
    User(Uuid),
    Guest(String),
}

/// Input for adding an item to a cart.
#[derive(Debug, Deserialize, Validate)]
pub struct AddItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// Cart with its line items.
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<CartItemModel>,
}

/// A problem found when re-validating a cart against current stock.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CartIssue {
    ProductInactive {
        product_id: Uuid,
        name: String,
    },
    OutOfStock {
        product_id: Uuid,
        name: String,
    },
    InsufficientStock {
        product_id: Uuid,
        name: String,
        available: i32,
        in_cart: i32,
    },
}

/// Shopping cart store.
///
/// One active cart per identity, created lazily on first add. Prices are
/// captured at add time; quantities are validated against live stock on
/// every write and re-validated by the checkout engine. Every mutation
/// touches `updated_at`, which drives the expiry reaper.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Finds the identity's cart, creating it if absent.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, owner: &CartOwner) -> Result<CartModel, ServiceError> {
        if let Some(existing) = Self::find_by_owner(&*self.db, owner).await? {
            return Ok(existing);
        }

        let cart = Self::insert_for_owner(&*self.db, owner).await?;
        self.event_sender
            .send_or_log(Event::CartCreated(cart.id))
            .await;
        info!(cart_id = %cart.id, "created cart");
        Ok(cart)
    }

    /// Returns the identity's cart with items, or `None` if it has none.
    pub async fn get(&self, owner: &CartOwner) -> Result<Option<CartWithItems>, ServiceError> {
        let Some(cart) = Self::find_by_owner(&*self.db, owner).await? else {
            return Ok(None);
        };
        let items = cart.find_related(CartItem).all(&*self.db).await?;
        Ok(Some(CartWithItems { cart, items }))
    }

    /// Adds an item to the identity's cart, creating the cart if needed.
    ///
    /// If the product is already in the cart the quantities are summed and
    /// the combined quantity is validated against current stock, so adding
    /// 3 with 2 already present and stock 4 fails.
    #[instrument(skip(self, input), fields(product_id = %input.product_id, quantity = input.quantity))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        input: AddItemInput,
    ) -> Result<CartWithItems, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let product = StockLedger::check_availability(&txn, input.product_id, input.quantity).await?;

        let cart = match Self::find_by_owner(&txn, owner).await? {
            Some(cart) => cart,
            None => Self::insert_for_owner(&txn, owner).await?,
        };

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .one(&txn)
            .await?;

        match existing {
            Some(item) => {
                let combined = item.quantity + input.quantity;
                if combined > product.stock_quantity {
                    return Err(ServiceError::insufficient_stock(
                        product.id,
                        product.name,
                        product.stock_quantity,
                        combined,
                    ));
                }
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(combined);
                item.updated_at = Set(Utc::now());
                item.update(&txn).await?;
            }
            None => {
                let item = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    quantity: Set(input.quantity),
                    // Price captured now; checkout does not reprice.
                    unit_price: Set(product.price),
                    created_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                };
                item.insert(&txn).await?;
            }
        }

        let cart = Self::touch(&txn, cart).await?;
        let items = cart.find_related(CartItem).all(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(cart.id))
            .await;

        Ok(CartWithItems { cart, items })
    }

    /// Sets a cart item's quantity, validated against current stock.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let item = CartItem::find_by_id(item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        let product = StockLedger::get_product(&txn, item.product_id).await?;
        if quantity > product.stock_quantity {
            return Err(ServiceError::insufficient_stock(
                product.id,
                product.name,
                product.stock_quantity,
                quantity,
            ));
        }

        let cart_id = item.cart_id;
        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(quantity);
        item.updated_at = Set(Utc::now());
        item.update(&txn).await?;

        let cart = Self::get_cart(&txn, cart_id).await?;
        let cart = Self::touch(&txn, cart).await?;
        let items = cart.find_related(CartItem).all(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(cart_id))
            .await;

        Ok(CartWithItems { cart, items })
    }

    /// Removes a single item from its cart.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, item_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let item = CartItem::find_by_id(item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        let cart_id = item.cart_id;
        item.delete(&txn).await?;

        let cart = Self::get_cart(&txn, cart_id).await?;
        let cart = Self::touch(&txn, cart).await?;
        let items = cart.find_related(CartItem).all(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(cart_id))
            .await;

        Ok(CartWithItems { cart, items })
    }

    /// Deletes all items from a cart. The cart row stays.
    #[instrument(skip(self))]
    pub async fn clear(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        Self::clear_in_txn(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(cart_id))
            .await;
        info!(%cart_id, "cleared cart");
        Ok(())
    }

    /// Clears a cart inside a caller-owned transaction (checkout engine).
    pub(crate) async fn clear_in_txn<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;

        let cart = Self::get_cart(conn, cart_id).await?;
        Self::touch(conn, cart).await?;
        Ok(())
    }

    /// Re-validates every item against current stock and active status.
    /// Empty result means the cart is ready for checkout.
    #[instrument(skip(self))]
    pub async fn validate(&self, cart_id: Uuid) -> Result<Vec<CartIssue>, ServiceError> {
        let cart = Self::get_cart(&*self.db, cart_id).await?;
        let items = cart.find_related(CartItem).all(&*self.db).await?;

        let mut issues = Vec::new();
        for item in &items {
            let product = match StockLedger::get_product(&*self.db, item.product_id).await {
                Ok(product) => product,
                Err(ServiceError::NotFound(_)) => {
                    issues.push(CartIssue::ProductInactive {
                        product_id: item.product_id,
                        name: "(removed)".to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !product.is_active {
                issues.push(CartIssue::ProductInactive {
                    product_id: product.id,
                    name: product.name,
                });
            } else if product.stock_quantity == 0 {
                issues.push(CartIssue::OutOfStock {
                    product_id: product.id,
                    name: product.name,
                });
            } else if item.quantity > product.stock_quantity {
                issues.push(CartIssue::InsufficientStock {
                    product_id: product.id,
                    name: product.name,
                    available: product.stock_quantity,
                    in_cart: item.quantity,
                });
            }
        }

        Ok(issues)
    }

    /// Folds a guest cart into the user's cart at login.
    ///
    /// Quantities are summed per product without re-validating stock; the
    /// checkout engine re-checks anyway. If the user has no cart the guest
    /// cart is re-owned in place. The guest cart is gone afterwards either
    /// way. The whole merge is one transaction.
    #[instrument(skip(self))]
    pub async fn merge(&self, user_id: Uuid, session_id: &str) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;

        let guest_cart = Cart::find()
            .filter(cart::Column::SessionId.eq(session_id))
            .one(&txn)
            .await?;

        let user_cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&txn)
            .await?;

        let Some(guest_cart) = guest_cart else {
            // Nothing to merge; hand back (or create) the user cart.
            let cart = match user_cart {
                Some(cart) => cart,
                None => Self::insert_for_owner(&txn, &CartOwner::User(user_id)).await?,
            };
            txn.commit().await?;
            return Ok(cart);
        };

        let Some(user_cart) = user_cart else {
            // Re-own the guest cart: identity swap, zero copying.
            let guest_id = guest_cart.id;
            let mut active: cart::ActiveModel = guest_cart.into();
            active.user_id = Set(Some(user_id));
            active.session_id = Set(None);
            active.updated_at = Set(Utc::now());
            let cart = active.update(&txn).await?;
            txn.commit().await?;

            self.event_sender
                .send_or_log(Event::CartMerged {
                    user_cart_id: cart.id,
                    guest_cart_id: guest_id,
                })
                .await;
            return Ok(cart);
        };

        let guest_items = guest_cart.find_related(CartItem).all(&txn).await?;
        for guest_item in guest_items {
            let existing = CartItem::find()
                .filter(cart_item::Column::CartId.eq(user_cart.id))
                .filter(cart_item::Column::ProductId.eq(guest_item.product_id))
                .one(&txn)
                .await?;

            match existing {
                Some(user_item) => {
                    let combined = user_item.quantity + guest_item.quantity;
                    let mut user_item: cart_item::ActiveModel = user_item.into();
                    user_item.quantity = Set(combined);
                    user_item.updated_at = Set(Utc::now());
                    user_item.update(&txn).await?;
                }
                None => {
                    // Move the line across, keeping its captured price.
                    let mut moved: cart_item::ActiveModel = guest_item.into();
                    moved.cart_id = Set(user_cart.id);
                    moved.updated_at = Set(Utc::now());
                    moved.update(&txn).await?;
                }
            }
        }

        let guest_cart_id = guest_cart.id;
        // Remaining guest items cascade with the cart row.
        guest_cart.delete(&txn).await?;
        let merged = Self::touch(&txn, user_cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartMerged {
                user_cart_id: merged.id,
                guest_cart_id,
            })
            .await;

        info!(user_cart_id = %merged.id, %guest_cart_id, "merged guest cart");
        Ok(merged)
    }

    /// Deletes carts that have not been touched within the retention
    /// window. Returns how many were reaped. Run periodically.
    #[instrument(skip(self))]
    pub async fn reap_expired(&self, retention_days: i64) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - Duration::days(retention_days);

        let result = Cart::delete_many()
            .filter(cart::Column::UpdatedAt.lt(cutoff))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(count = result.rows_affected, "reaped expired carts");
            self.event_sender
                .send_or_log(Event::CartsReaped {
                    count: result.rows_affected,
                })
                .await;
        }
        Ok(result.rows_affected)
    }

    async fn find_by_owner<C: ConnectionTrait>(
        conn: &C,
        owner: &CartOwner,
    ) -> Result<Option<CartModel>, ServiceError> {
        let query = match owner {
            CartOwner::User(user_id) => Cart::find().filter(cart::Column::UserId.eq(*user_id)),
            CartOwner::Guest(session_id) => {
                Cart::find().filter(cart::Column::SessionId.eq(session_id.clone()))
            }
        };
        Ok(query.one(conn).await?)
    }

    async fn insert_for_owner<C: ConnectionTrait>(
        conn: &C,
        owner: &CartOwner,
    ) -> Result<CartModel, ServiceError> {
        let (user_id, session_id) = match owner {
            CartOwner::User(user_id) => (Some(*user_id), None),
            CartOwner::Guest(session_id) => (None, Some(session_id.clone())),
        };

        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            session_id: Set(session_id),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        Ok(cart.insert(conn).await?)
    }

    async fn get_cart<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))
    }

    async fn touch<C: ConnectionTrait>(
        conn: &C,
        cart: CartModel,
    ) -> Result<CartModel, ServiceError> {
        let mut active: cart::ActiveModel = cart.into();
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_item_input_rejects_non_positive_quantity() {
        let input = AddItemInput {
            product_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert!(input.validate().is_err());

        let input = AddItemInput {
            product_id: Uuid::new_v4(),
            quantity: 1,
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn cart_owner_variants_are_exclusive() {
        let user = CartOwner::User(Uuid::new_v4());
        let guest = CartOwner::Guest("sess_1".to_string());
        assert_ne!(user, guest);
    }

    #[test]
    fn cart_issue_serializes_with_kind_tag() {
        let issue = CartIssue::InsufficientStock {
            product_id: Uuid::new_v4(),
            name: "Baguette".to_string(),
            available: 2,
            in_cart: 5,
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "insufficient_stock");
        assert_eq!(json["available"], 2);
        assert_eq!(json["in_cart"], 5);
    }
}
