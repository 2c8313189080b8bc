mod common;

use assert_matches::assert_matches;
use common::{options, TestApp, CUSTOMER_ID, OTHER_CUSTOMER_ID};
use serde_json::{json, Value};
use techshop_api::{
    errors::ServiceError,
    services::{
        cart::{AddCartItemRequest, UpdateCartItemRequest},
        variants::ProductKind,
    },
};

fn add(product_id: i32, quantity: i32, options: Value) -> AddCartItemRequest {
    AddCartItemRequest {
        product_id,
        quantity,
        options,
        variant_image: None,
    }
}

#[tokio::test]
async fn empty_cart_is_returned_without_a_row() {
    let app = TestApp::new().await;
    let cart = app.state.services.cart.get_cart(CUSTOMER_ID).await.unwrap();
    assert_eq!(cart.cart_id, None);
    assert!(cart.items.is_empty());
    assert_eq!(cart.total_amount, 0);
}

#[tokio::test]
async fn same_variant_merges_into_one_line() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let phone = app
        .seed_phone(
            "Phone X",
            20_000_000,
            &[(&[("color", "red"), ("storage", "128gb")], 5)],
        )
        .await;

    cart.add_item(CUSTOMER_ID, add(phone.id, 1, json!({"color": "red", "storage": "128gb"})))
        .await
        .unwrap();
    // Key order and display hints do not make a different line.
    let view = cart
        .add_item(
            CUSTOMER_ID,
            add(phone.id, 2, json!({"storage": "128gb", "color": "red", "variantPrice": 1})),
        )
        .await
        .unwrap();

    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 3);
    assert_eq!(view.items[0].variant_key.as_deref(), Some("color:red|storage:128gb"));
    assert_eq!(view.items[0].options, options(&[("color", "red"), ("storage", "128gb")]));
    assert_eq!(view.total_amount, 60_000_000);
}

#[tokio::test]
async fn different_variants_stay_separate() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let phone = app
        .seed_phone(
            "Phone X",
            20_000_000,
            &[(&[("color", "red")], 5), (&[("color", "blue")], 5)],
        )
        .await;

    cart.add_item(CUSTOMER_ID, add(phone.id, 1, json!({"color": "red"})))
        .await
        .unwrap();
    let view = cart
        .add_item(CUSTOMER_ID, add(phone.id, 1, json!({"color": "blue"})))
        .await
        .unwrap();

    assert_eq!(view.items.len(), 2);
}

#[tokio::test]
async fn adding_more_than_stock_is_rejected() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let product = app.seed_product("Watch", 4_000_000, 2, ProductKind::Accessory).await;

    cart.add_item(CUSTOMER_ID, add(product.id, 2, Value::Null))
        .await
        .unwrap();
    // The merged quantity is what gets checked.
    assert_matches!(
        cart.add_item(CUSTOMER_ID, add(product.id, 1, Value::Null)).await,
        Err(ServiceError::InsufficientStock(_))
    );

    let view = cart.get_cart(CUSTOMER_ID).await.unwrap();
    assert_eq!(view.items[0].quantity, 2);
    // The cart holds no stock.
    assert_eq!(app.product(product.id).await.stock, 2);
}

#[tokio::test]
async fn unknown_product_and_bad_options_are_rejected() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let product = app.seed_product("Watch", 4_000_000, 2, ProductKind::Accessory).await;

    assert_matches!(
        cart.add_item(CUSTOMER_ID, add(4_242, 1, Value::Null)).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        cart.add_item(CUSTOMER_ID, add(product.id, 1, json!("red"))).await,
        Err(ServiceError::MalformedOptions(_))
    );
    assert_matches!(
        cart.add_item(CUSTOMER_ID, add(product.id, 0, Value::Null)).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn selection_must_fit_the_product_kind() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let laptop = app.seed_product("Laptop Z", 25_000_000, 10, ProductKind::Laptop).await;
    let phone = app
        .seed_phone("Phone X", 20_000_000, &[(&[("color", "red")], 5)])
        .await;

    assert_matches!(
        cart.add_item(CUSTOMER_ID, add(laptop.id, 1, json!({"color": "red"}))).await,
        Err(ServiceError::MalformedOptions(_))
    );
    assert_matches!(
        cart.add_item(CUSTOMER_ID, add(phone.id, 1, json!({"color": "red", "config": "i7"})))
            .await,
        Err(ServiceError::MalformedOptions(_))
    );
    assert!(cart.get_cart(CUSTOMER_ID).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn update_and_remove_are_scoped_to_the_owner() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let product = app.seed_product("Watch", 4_000_000, 5, ProductKind::Accessory).await;

    let view = cart
        .add_item(CUSTOMER_ID, add(product.id, 1, Value::Null))
        .await
        .unwrap();
    let item_id = view.items[0].id;

    assert_matches!(
        cart.update_quantity(OTHER_CUSTOMER_ID, item_id, UpdateCartItemRequest { quantity: 2 })
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        cart.remove_item(OTHER_CUSTOMER_ID, item_id).await,
        Err(ServiceError::NotFound(_))
    );

    let updated = cart
        .update_quantity(CUSTOMER_ID, item_id, UpdateCartItemRequest { quantity: 4 })
        .await
        .unwrap();
    assert_eq!(updated.items[0].quantity, 4);
    assert_eq!(updated.total_amount, 16_000_000);

    assert_matches!(
        cart.update_quantity(CUSTOMER_ID, item_id, UpdateCartItemRequest { quantity: 6 })
            .await,
        Err(ServiceError::InsufficientStock(_))
    );

    let removed = cart.remove_item(CUSTOMER_ID, item_id).await.unwrap();
    assert!(removed.items.is_empty());
}

#[tokio::test]
async fn clear_cart_reports_removed_lines() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    let first = app.seed_product("Watch", 4_000_000, 5, ProductKind::Accessory).await;
    let second = app.seed_product("Strap", 300_000, 5, ProductKind::Accessory).await;

    assert_eq!(cart.clear_cart(CUSTOMER_ID).await.unwrap(), 0);

    cart.add_item(CUSTOMER_ID, add(first.id, 1, Value::Null))
        .await
        .unwrap();
    cart.add_item(CUSTOMER_ID, add(second.id, 1, Value::Null))
        .await
        .unwrap();

    assert_eq!(cart.clear_cart(CUSTOMER_ID).await.unwrap(), 2);
    let view = cart.get_cart(CUSTOMER_ID).await.unwrap();
    assert!(view.cart_id.is_some());
    assert!(view.items.is_empty());
}
