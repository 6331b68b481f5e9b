//! Cart reconciliation over HTTP against the fake backend.
//!
//! Run with: cargo test -p vitrine-integration-tests

use secrecy::SecretString;
use vitrine_core::{Money, Product, ProductId};
use vitrine_integration_tests::{COUPON_CODE, FakeServer};
use vitrine_storefront::Storefront;

async fn product(app: &Storefront, id: ProductId) -> Product {
    app.catalog()
        .product(id)
        .await
        .expect("Failed to load catalog")
        .expect("Product missing from catalog")
}

#[tokio::test]
async fn test_first_add_creates_order_and_repeat_adds_accumulate() {
    let server = FakeServer::start().await;
    let coffee = server.add_product(1, "Café especial", 1_000, 10);
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut app = server.storefront(&dir.path().join("state.json")).await;

    let coffee = product(&app, coffee).await;
    app.cart_mut()
        .add_item(&coffee)
        .await
        .expect("First add failed");

    let order = app.cart().snapshot().expect("Order should exist after add");
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.total, Money::from_cents(1_000));

    for _ in 0..2 {
        app.cart_mut().add_item(&coffee).await.expect("Add failed");
    }
    let order = app.cart().snapshot().expect("Order should still exist");
    assert_eq!(order.line(coffee.id).map(|line| line.quantity), Some(3));
    assert_eq!(order.total, Money::from_cents(3_000));
    assert_eq!(server.requests("POST /api/orders"), 1);
}

#[tokio::test]
async fn test_quantity_zero_removes_line() {
    let server = FakeServer::start().await;
    let bread = server.add_product(1, "Pão de queijo", 500, 10);
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut app = server.storefront(&dir.path().join("state.json")).await;

    let bread = product(&app, bread).await;
    app.cart_mut().add_item(&bread).await.expect("Add failed");
    app.cart_mut()
        .set_quantity(bread.id, 2)
        .await
        .expect("Setting quantity failed");
    assert_eq!(
        app.cart().order().map(|order| order.total),
        Some(Money::from_cents(1_000))
    );

    app.cart_mut()
        .set_quantity(bread.id, 0)
        .await
        .expect("Removing line failed");
    let order = app.cart().snapshot().expect("Order stays open when emptied");
    assert!(order.is_empty());
    assert_eq!(order.total, Money::ZERO);
}

#[tokio::test]
async fn test_coupon_discounts_once() {
    let server = FakeServer::start().await;
    let kit = server.add_product(1, "Kit presente", 10_000, 3);
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut app = server.storefront(&dir.path().join("state.json")).await;

    let kit = product(&app, kit).await;
    app.cart_mut().add_item(&kit).await.expect("Add failed");
    app.cart_mut()
        .apply_coupon(" save10 ")
        .await
        .expect("Coupon rejected");

    let order = app.cart().snapshot().expect("Order should exist");
    assert!(order.has_coupon());
    assert_eq!(order.coupon_code.as_deref(), Some(COUPON_CODE));
    assert_eq!(order.discount, Money::from_cents(1_000));
    assert_eq!(order.total, Money::from_cents(9_000));

    let err = app
        .cart_mut()
        .apply_coupon(COUPON_CODE)
        .await
        .expect_err("Second coupon should be rejected");
    assert_eq!(err.server_message(), Some("A coupon has already been applied"));
    assert_eq!(
        app.cart().order().map(|order| order.total),
        Some(Money::from_cents(9_000))
    );
}

#[tokio::test]
async fn test_unknown_coupon_message_is_surfaced() {
    let server = FakeServer::start().await;
    let kit = server.add_product(1, "Kit presente", 10_000, 3);
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut app = server.storefront(&dir.path().join("state.json")).await;

    let kit = product(&app, kit).await;
    app.cart_mut().add_item(&kit).await.expect("Add failed");
    let err = app
        .cart_mut()
        .apply_coupon("BLACKFRIDAY")
        .await
        .expect_err("Unknown coupon should be rejected");
    assert_eq!(err.user_message("Could not apply the coupon."), "Invalid coupon");
    assert!(!app.cart().order().is_some_and(vitrine_core::Order::has_coupon));
}

#[tokio::test]
async fn test_add_to_vanished_order_retries_on_fresh_order() {
    let server = FakeServer::start().await;
    let coffee = server.add_product(1, "Café especial", 1_000, 10);
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut app = server.storefront(&dir.path().join("state.json")).await;

    let coffee = product(&app, coffee).await;
    app.cart_mut().add_item(&coffee).await.expect("Add failed");
    let stale = app.cart().order_id().expect("Order should exist");
    server.drop_order(stale);

    app.cart_mut()
        .add_item(&coffee)
        .await
        .expect("Add should be retried on a fresh order");

    let order = app.cart().snapshot().expect("Fresh order should exist");
    assert_ne!(order.id, stale);
    assert_eq!(order.line(coffee.id).map(|line| line.quantity), Some(1));
    assert_eq!(server.requests("POST /api/orders"), 2);
}

#[tokio::test]
async fn test_clear_items_keeps_order() {
    let server = FakeServer::start().await;
    let coffee = server.add_product(1, "Café especial", 1_000, 10);
    let bread = server.add_product(2, "Pão de queijo", 500, 10);
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut app = server.storefront(&dir.path().join("state.json")).await;

    for id in [coffee, bread] {
        let item = product(&app, id).await;
        app.cart_mut().add_item(&item).await.expect("Add failed");
    }
    let id = app.cart().order_id();

    app.cart_mut().clear_items().await.expect("Clear failed");
    assert_eq!(app.cart().order_id(), id);
    assert!(app.cart().order().is_some_and(vitrine_core::Order::is_empty));
}

#[tokio::test]
async fn test_signed_in_cart_survives_restart() {
    let server = FakeServer::start().await;
    let coffee = server.add_product(1, "Café especial", 1_000, 10);
    let user = server.add_user("ana@example.com", "s3cret");
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let state_file = dir.path().join("state.json");

    let order_id = {
        let mut app = server.storefront(&state_file).await;
        app.login("ana@example.com", SecretString::from("s3cret"))
            .await
            .expect("Login failed");
        let coffee = product(&app, coffee).await;
        app.cart_mut().add_item(&coffee).await.expect("Add failed");
        app.cart().order_id().expect("Order should exist")
    };
    assert_eq!(server.order_owner(order_id), Some(user));

    let app = server.storefront(&state_file).await;
    assert_eq!(app.identity().map(|identity| identity.user_id), Some(user));
    assert_eq!(app.cart().order_id(), Some(order_id));
    assert_eq!(
        app.cart().order().map(|order| order.total),
        Some(Money::from_cents(1_000))
    );
}

#[tokio::test]
async fn test_anonymous_cart_is_forgotten_without_its_session_cookie() {
    let server = FakeServer::start().await;
    let coffee = server.add_product(1, "Café especial", 1_000, 10);
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let state_file = dir.path().join("state.json");

    let order_id = {
        let mut app = server.storefront(&state_file).await;
        let coffee = product(&app, coffee).await;
        app.cart_mut().add_item(&coffee).await.expect("Add failed");
        app.cart().order_id().expect("Order should exist")
    };
    let lookup = format!("GET /api/orders/{order_id}");
    let lookups = server.requests(&lookup);

    // A new process starts with an empty cookie jar
    let app = server.storefront(&state_file).await;
    assert!(app.cart().order().is_none());
    assert_eq!(server.requests(&lookup), lookups + 1);

    // The stale id was dropped from the state file
    let reopened = server.storefront(&state_file).await;
    assert!(reopened.cart().order_id().is_none());
    assert_eq!(server.requests(&lookup), lookups + 1);
}
