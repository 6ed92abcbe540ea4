mod common;

use common::TestApp;
use rust_decimal_macros::dec;
use storefront_api::{
    errors::ServiceError,
    services::{AddItemInput, CartOwner},
};
use uuid::Uuid;

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn cart_is_created_lazily_per_identity() {
    let app = TestApp::new().await;
    let owner = CartOwner::Guest("sess_lazy".to_string());

    assert!(app.cart.get(&owner).await.unwrap().is_none());

    let cart = app.cart.get_or_create(&owner).await.unwrap();
    assert_eq!(cart.session_id.as_deref(), Some("sess_lazy"));
    assert!(cart.user_id.is_none());

    // Second call returns the same cart.
    let again = app.cart.get_or_create(&owner).await.unwrap();
    assert_eq!(again.id, cart.id);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn add_item_captures_price_at_add_time() {
    let app = TestApp::new().await;
    let owner = CartOwner::Guest("sess_price".to_string());
    let product_id = app.seed_product("Sourdough Loaf", dec!(6.50), 10).await;

    let cart = app
        .cart
        .add_item(
            &owner,
            AddItemInput {
                product_id,
                quantity: 2,
            },
        )
        .await
        .unwrap();

    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].unit_price, dec!(6.50));
    assert_eq!(cart.items[0].quantity, 2);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn adding_same_product_folds_quantities_and_revalidates() {
    let app = TestApp::new().await;
    let owner = CartOwner::Guest("sess_fold".to_string());
    let product_id = app.seed_product("Rye Loaf", dec!(4.00), 4).await;

    app.add_to_cart(&owner, product_id, 2).await;

    // 2 already present, stock 4: adding 3 would need 5.
    let err = app
        .cart
        .add_item(
            &owner,
            AddItemInput {
                product_id,
                quantity: 3,
            },
        )
        .await
        .unwrap_err();

    match err {
        ServiceError::InsufficientStock {
            available,
            requested,
            ..
        } => {
            assert_eq!(available, 4);
            assert_eq!(requested, 5);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Adding 2 more (4 total) fits exactly.
    let cart = app
        .cart
        .add_item(
            &owner,
            AddItemInput {
                product_id,
                quantity: 2,
            },
        )
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 4);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn inactive_product_cannot_be_added() {
    let app = TestApp::new().await;
    let owner = CartOwner::Guest("sess_inactive".to_string());
    let product_id = app
        .seed_product_full("Discontinued Scone", dec!(2.00), 5, false)
        .await;

    let err = app
        .cart
        .add_item(
            &owner,
            AddItemInput {
                product_id,
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ProductUnavailable { .. }));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn update_item_validates_stock() {
    let app = TestApp::new().await;
    let owner = CartOwner::Guest("sess_update".to_string());
    let product_id = app.seed_product("Baguette", dec!(3.25), 3).await;

    let cart = app
        .cart
        .add_item(
            &owner,
            AddItemInput {
                product_id,
                quantity: 1,
            },
        )
        .await
        .unwrap();
    let item_id = cart.items[0].id;

    let err = app.cart.update_item(item_id, 5).await.unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock { .. }));

    let err = app.cart.update_item(item_id, 0).await.unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let cart = app.cart.update_item(item_id, 3).await.unwrap();
    assert_eq!(cart.items[0].quantity, 3);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn remove_and_clear() {
    let app = TestApp::new().await;
    let owner = CartOwner::Guest("sess_clear".to_string());
    let a = app.seed_product("Croissant", dec!(2.75), 10).await;
    let b = app.seed_product("Brioche", dec!(5.00), 10).await;

    app.add_to_cart(&owner, a, 1).await;
    app.add_to_cart(&owner, b, 2).await;

    let cart = app.cart.get(&owner).await.unwrap().unwrap();
    assert_eq!(cart.items.len(), 2);

    let item_a = cart.items.iter().find(|i| i.product_id == a).unwrap();
    let cart = app.cart.remove_item(item_a.id).await.unwrap();
    assert_eq!(cart.items.len(), 1);

    app.cart.clear(cart.cart.id).await.unwrap();
    let cart = app.cart.get(&owner).await.unwrap().unwrap();
    assert!(cart.items.is_empty());

    // Removing an item that is gone is NotFound.
    let err = app.cart.remove_item(item_a.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn merge_sums_quantities_per_product() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let user = CartOwner::User(user_id);
    let guest = CartOwner::Guest("sess_merge".to_string());

    let a = app.seed_product("Ciabatta", dec!(4.50), 20).await;
    let b = app.seed_product("Focaccia", dec!(6.00), 20).await;

    // guest cart {A:2}, user cart {A:1, B:1}
    app.add_to_cart(&guest, a, 2).await;
    app.add_to_cart(&user, a, 1).await;
    app.add_to_cart(&user, b, 1).await;

    let merged = app.cart.merge(user_id, "sess_merge").await.unwrap();
    assert_eq!(merged.user_id, Some(user_id));

    let cart = app.cart.get(&user).await.unwrap().unwrap();
    assert_eq!(cart.items.len(), 2);
    let qty_a = cart
        .items
        .iter()
        .find(|i| i.product_id == a)
        .unwrap()
        .quantity;
    let qty_b = cart
        .items
        .iter()
        .find(|i| i.product_id == b)
        .unwrap()
        .quantity;
    assert_eq!(qty_a, 3);
    assert_eq!(qty_b, 1);

    // Guest cart is gone.
    assert!(app.cart.get(&guest).await.unwrap().is_none());
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn merge_without_guest_cart_is_a_noop() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let user = CartOwner::User(user_id);
    let a = app.seed_product("Pretzel", dec!(1.50), 10).await;
    app.add_to_cart(&user, a, 2).await;

    let merged = app.cart.merge(user_id, "sess_absent").await.unwrap();
    assert_eq!(merged.user_id, Some(user_id));

    let cart = app.cart.get(&user).await.unwrap().unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn merge_into_missing_user_cart_reowns_guest_cart() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let guest = CartOwner::Guest("sess_reown".to_string());
    let a = app.seed_product("Bagel", dec!(2.00), 10).await;
    app.add_to_cart(&guest, a, 3).await;

    let guest_cart_id = app.cart.get(&guest).await.unwrap().unwrap().cart.id;
    let merged = app.cart.merge(user_id, "sess_reown").await.unwrap();

    // Identity swap: same cart row, new owner, no session id.
    assert_eq!(merged.id, guest_cart_id);
    assert_eq!(merged.user_id, Some(user_id));
    assert!(merged.session_id.is_none());

    let cart = app.cart.get(&CartOwner::User(user_id)).await.unwrap().unwrap();
    assert_eq!(cart.items[0].quantity, 3);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn validate_reports_stock_and_activity_issues() {
    let app = TestApp::new().await;
    let owner = CartOwner::Guest("sess_validate".to_string());
    let a = app.seed_product("Muffin", dec!(2.50), 5).await;

    app.add_to_cart(&owner, a, 4).await;
    let cart_id = app.cart.get(&owner).await.unwrap().unwrap().cart.id;

    assert!(app.cart.validate(cart_id).await.unwrap().is_empty());

    // Stock drops below the cart quantity.
    app.set_stock(a, 2).await;
    let issues = app.cart.validate(cart_id).await.unwrap();
    assert_eq!(issues.len(), 1);
    assert!(matches!(
        issues[0],
        storefront_api::services::CartIssue::InsufficientStock {
            available: 2,
            in_cart: 4,
            ..
        }
    ));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn reaper_deletes_only_stale_carts() {
    let app = TestApp::new().await;
    let fresh = CartOwner::Guest("sess_fresh".to_string());
    let a = app.seed_product("Danish", dec!(3.00), 10).await;
    app.add_to_cart(&fresh, a, 1).await;

    // Nothing is stale yet.
    assert_eq!(app.cart.reap_expired(30).await.unwrap(), 0);
    assert!(app.cart.get(&fresh).await.unwrap().is_some());

    // Negative retention pushes the cutoff into the future, making the
    // just-touched cart stale.
    assert_eq!(app.cart.reap_expired(-1).await.unwrap(), 1);
    assert!(app.cart.get(&fresh).await.unwrap().is_none());
}
