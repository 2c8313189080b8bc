mod common;

use assert_matches::assert_matches;
use common::{options, TestApp};
use techshop_api::{
    db::with_transaction,
    errors::ServiceError,
    services::{
        inventory::{InventoryLedger, VariantRow},
        variants::{ProductKind, VariantChoice, VariantDefinition},
    },
};

#[tokio::test]
async fn plain_product_decrement_and_restore_round_trip() {
    let app = TestApp::new().await;
    let product = app.seed_product("USB-C cable", 150_000, 5, ProductKind::Accessory).await;

    assert!(InventoryLedger::decrement_stock(app.db(), product.id, None, 3).await.unwrap());
    assert_eq!(app.product(product.id).await.stock, 2);

    InventoryLedger::restore_stock(app.db(), product.id, None, 3).await.unwrap();
    assert_eq!(app.product(product.id).await.stock, 5);
}

#[tokio::test]
async fn decrement_beyond_stock_is_rejected_without_change() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mouse", 300_000, 2, ProductKind::Accessory).await;

    assert!(!InventoryLedger::decrement_stock(app.db(), product.id, None, 3).await.unwrap());
    assert_eq!(app.product(product.id).await.stock, 2);

    // Exactly the remaining stock is allowed and lands on zero.
    assert!(InventoryLedger::decrement_stock(app.db(), product.id, None, 2).await.unwrap());
    assert_eq!(app.product(product.id).await.stock, 0);
}

#[tokio::test]
async fn non_positive_quantity_is_a_validation_error() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mouse", 300_000, 2, ProductKind::Accessory).await;

    let err = InventoryLedger::decrement_stock(app.db(), product.id, None, 0)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn variant_decrement_moves_variant_and_aggregate_together() {
    let app = TestApp::new().await;
    let phone = app
        .seed_phone(
            "Phone X",
            20_000_000,
            &[
                (&[("color", "red"), ("storage", "128gb")], 2),
                (&[("color", "blue"), ("storage", "128gb")], 8),
            ],
        )
        .await;
    assert_eq!(phone.stock, 10);

    let red = options(&[("storage", "128gb"), ("color", "red")]).variant_key();
    assert!(InventoryLedger::decrement_stock(app.db(), phone.id, red.as_ref(), 2).await.unwrap());

    let variants = app.variants(phone.id).await;
    assert_eq!(variants[0].variant_key, "color:red|storage:128gb");
    assert_eq!(variants[0].stock, 0);
    assert_eq!(variants[1].stock, 8);
    assert_eq!(app.product(phone.id).await.stock, 8);

    // The blue variant still has stock, but red does not.
    assert!(!InventoryLedger::decrement_stock(app.db(), phone.id, red.as_ref(), 1).await.unwrap());
    assert_eq!(app.product(phone.id).await.stock, 8);

    InventoryLedger::restore_stock(app.db(), phone.id, red.as_ref(), 2).await.unwrap();
    assert_eq!(app.variants(phone.id).await[0].stock, 2);
    assert_eq!(app.product(phone.id).await.stock, 10);
}

#[tokio::test]
async fn product_with_variants_requires_a_selection() {
    let app = TestApp::new().await;
    let phone = app
        .seed_phone("Phone X", 20_000_000, &[(&[("color", "red")], 4)])
        .await;

    let err = InventoryLedger::decrement_stock(app.db(), phone.id, None, 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::MalformedOptions(_));
    assert_eq!(app.product(phone.id).await.stock, 4);
}

#[tokio::test]
async fn unknown_variant_reports_no_stock() {
    let app = TestApp::new().await;
    let phone = app
        .seed_phone("Phone X", 20_000_000, &[(&[("color", "red")], 4)])
        .await;
    let green = options(&[("color", "green")]).variant_key();

    assert!(!InventoryLedger::check_stock(app.db(), phone.id, green.as_ref(), 1).await.unwrap());
    assert_matches!(
        InventoryLedger::get_stock(app.db(), phone.id, green.as_ref()).await,
        Err(ServiceError::NotFound(_))
    );
    assert!(!InventoryLedger::decrement_stock(app.db(), phone.id, green.as_ref(), 1).await.unwrap());
}

#[tokio::test]
async fn failed_decrement_inside_transaction_rolls_back_earlier_ones() {
    let app = TestApp::new().await;
    let first = app.seed_product("Charger", 400_000, 5, ProductKind::Accessory).await;
    let second = app.seed_product("Case", 200_000, 1, ProductKind::Accessory).await;
    let (first_id, second_id) = (first.id, second.id);

    let result = with_transaction(app.db(), move |txn| {
        Box::pin(async move {
            InventoryLedger::decrement_stock(txn, first_id, None, 2).await?;
            if !InventoryLedger::decrement_stock(txn, second_id, None, 3).await? {
                return Err(ServiceError::InsufficientStock("case".into()));
            }
            Ok(())
        })
    })
    .await;

    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));
    assert_eq!(app.product(first_id).await.stock, 5);
    assert_eq!(app.product(second_id).await.stock, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decrements_never_oversell() {
    let app = TestApp::file_backed(4).await;
    let product = app.seed_product("Headphones", 1_000_000, 10, ProductKind::Accessory).await;
    let product_id = product.id;

    // 20 single-unit decrements over 4 connections against 10 units: exactly 10 may win.
    let mut tasks = vec![];
    for _ in 0..20 {
        let db = app.state.db.clone();
        tasks.push(tokio::spawn(async move {
            InventoryLedger::decrement_stock(db.as_ref(), product_id, None, 1).await
        }));
    }
    let mut success = 0;
    for task in tasks {
        if task.await.unwrap().expect("decrement should not error") {
            success += 1;
        }
    }

    assert_eq!(success, 10, "exactly 10 decrements should succeed; got {}", success);
    assert_eq!(app.product(product_id).await.stock, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_variant_decrements_keep_aggregate_in_step() {
    let app = TestApp::file_backed(4).await;
    let phone = app
        .seed_phone("Phone Z", 18_000_000, &[(&[("color", "red")], 6), (&[("color", "blue")], 4)])
        .await;
    let product_id = phone.id;
    let red = options(&[("color", "red")]).variant_key();

    let mut tasks = vec![];
    for _ in 0..12 {
        let db = app.state.db.clone();
        let key = red.clone();
        tasks.push(tokio::spawn(async move {
            InventoryLedger::decrement_stock(db.as_ref(), product_id, key.as_ref(), 1).await
        }));
    }
    let mut success = 0;
    for task in tasks {
        if task.await.unwrap().expect("decrement should not error") {
            success += 1;
        }
    }

    assert_eq!(success, 6);
    assert_eq!(app.product(product_id).await.stock, 4);
    let stocks: Vec<i32> = app.variants(product_id).await.iter().map(|v| v.stock).collect();
    assert_eq!(stocks.iter().sum::<i32>(), 4);
}

#[tokio::test]
async fn sync_variants_is_idempotent_and_recomputes_aggregate() {
    let app = TestApp::new().await;
    let phone = app.seed_product("Phone Y", 15_000_000, 99, ProductKind::Phone).await;
    let rows = || {
        vec![
            VariantRow {
                options: options(&[("color", "black"), ("storage", "256gb")]),
                stock: 3,
                price: Some(17_000_000),
                sku: Some("PY-BLK-256".into()),
            },
            VariantRow {
                options: options(&[("color", "white"), ("storage", "256gb")]),
                stock: 4,
                price: None,
                sku: None,
            },
        ]
    };

    let first = app
        .state
        .services
        .inventory
        .sync_variants(phone.id, None, rows())
        .await
        .unwrap();
    let second = app
        .state
        .services
        .inventory
        .sync_variants(phone.id, None, rows())
        .await
        .unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(
        first.iter().map(|v| v.id).collect::<Vec<_>>(),
        second.iter().map(|v| v.id).collect::<Vec<_>>()
    );
    assert_eq!(app.product(phone.id).await.stock, 7);
    assert_eq!(second[0].price, Some(17_000_000));
}

#[tokio::test]
async fn sync_variants_rejects_rows_outside_the_definition() {
    let app = TestApp::new().await;
    let phone = app.seed_product("Phone Y", 15_000_000, 0, ProductKind::Phone).await;
    let definition = VariantDefinition {
        colors: vec![VariantChoice {
            name: "black".into(),
            price: None,
            image: None,
        }],
        storages: vec![VariantChoice {
            name: "256gb".into(),
            price: Some(17_000_000),
            image: None,
        }],
        configs: vec![],
    };
    let rows = vec![VariantRow {
        options: options(&[("color", "gold"), ("storage", "256gb")]),
        stock: 1,
        price: None,
        sku: None,
    }];

    let err = app
        .state
        .services
        .inventory
        .sync_variants(phone.id, Some(definition), rows)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::MalformedOptions(_));
    assert!(app.variants(phone.id).await.is_empty());
}

#[tokio::test]
async fn stock_level_reports_variant_or_aggregate() {
    let app = TestApp::new().await;
    let phone = app
        .seed_phone(
            "Phone X",
            20_000_000,
            &[(&[("color", "red")], 2), (&[("color", "blue")], 5)],
        )
        .await;
    let inventory = &app.state.services.inventory;

    let red = inventory
        .stock_level(phone.id, &options(&[("color", "red")]))
        .await
        .unwrap();
    assert_eq!(red.stock, 2);
    assert_eq!(red.variant_key.as_deref(), Some("color:red"));

    let total = inventory
        .stock_level(phone.id, &options(&[]))
        .await
        .unwrap();
    assert_eq!(total.stock, 7);
    assert_eq!(total.variant_key, None);
}
