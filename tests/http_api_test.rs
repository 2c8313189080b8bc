mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, CUSTOMER_ID, OTHER_CUSTOMER_ID};
use serde_json::json;
use techshop_api::{auth::Role, services::variants::ProductKind};

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"], "up");
}

#[tokio::test]
async fn openapi_document_lists_checkout_routes() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/orders"].is_object());
    assert!(body["paths"]["/api/v1/payments/vnpay/ipn"].is_object());
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = app
        .request(Method::GET, "/api/v1/cart", None, Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn checkout_over_http() {
    let app = TestApp::new().await;
    let token = app.customer_token();
    let product = app.seed_product("Laptop Z", 25_000_000, 5, ProductKind::Laptop).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": product.id, "quantity": 2})),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total_amount"], 50_000_000);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "shipping_address": "1 Tran Hung Dao, Ha Noi",
                "payment_method": "cod",
                "items": [{"product_id": product.id, "quantity": 2, "unit_price": 25_000_000}],
            })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["user_id"], CUSTOMER_ID);
    let order_id = body["data"]["id"].as_i64().unwrap();
    assert_eq!(app.product(product.id).await.stock, 3);

    let (_, cart) = app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await;
    assert_eq!(cart["data"]["items"].as_array().map(Vec::len), Some(0));

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/payments/check/{order_id}"), None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["payment_status"], "pending");

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/v1/orders/{order_id}"), None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.product(product.id).await.stock, 5);

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not Found");
}

#[tokio::test]
async fn insufficient_stock_is_unprocessable() {
    let app = TestApp::new().await;
    let token = app.customer_token();
    let product = app.seed_product("Laptop Z", 25_000_000, 1, ProductKind::Laptop).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "shipping_address": "1 Tran Hung Dao, Ha Noi",
                "payment_method": "momo",
                "items": [{"product_id": product.id, "quantity": 2, "unit_price": 25_000_000}],
            })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap_or_default().contains("stock"));
}

#[tokio::test]
async fn admin_routes_reject_customers() {
    let app = TestApp::new().await;
    let customer = app.customer_token();
    let other = app.token(OTHER_CUSTOMER_ID, Role::User);
    let admin = app.admin_token();
    let product = app.seed_product("Laptop Z", 25_000_000, 5, ProductKind::Laptop).await;

    let (_, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "shipping_address": "1 Tran Hung Dao, Ha Noi",
                "payment_method": "credit_card",
                "items": [{"product_id": product.id, "quantity": 1, "unit_price": 25_000_000}],
            })),
            Some(&customer),
        )
        .await;
    assert_eq!(body["data"]["payment_method"], "vnpay");
    let order_id = body["data"]["id"].as_i64().unwrap();
    let status_uri = format!("/api/v1/orders/{order_id}/status");

    let (status, _) = app
        .request(Method::PUT, &status_uri, Some(json!({"status": "shipped"})), Some(&customer))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None, Some(&other))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(Method::PUT, &status_uri, Some(json!({"status": "shipped"})), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "shipped");

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/v1/orders/{order_id}"), None, Some(&customer))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let payment_uri = format!("/api/v1/orders/{order_id}/payment");
    let (status, _) = app
        .request(Method::PUT, &payment_uri, Some(json!({"payment_status": "paid"})), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .request(Method::PUT, &payment_uri, Some(json!({"payment_status": "paid"})), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn variant_sync_and_stock_lookup() {
    let app = TestApp::new().await;
    let admin = app.admin_token();
    let phone = app.seed_product("Phone X", 20_000_000, 0, ProductKind::Phone).await;
    let variants_uri = format!("/api/v1/products/{}/variants", phone.id);
    let payload = json!({
        "definition": {
            "colors": [{"name": "red"}, {"name": "blue"}],
            "storages": [{"name": "128gb"}]
        },
        "variants": [
            {"options": {"color": "red", "storage": "128gb"}, "stock": 2},
            {"options": {"color": "blue", "storage": "128gb"}, "stock": 8, "price": 21000000}
        ]
    });

    let (status, _) = app
        .request(Method::PUT, &variants_uri, Some(payload.clone()), Some(&app.customer_token()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(Method::PUT, &variants_uri, Some(payload), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(app.product(phone.id).await.stock, 10);

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}/stock?storage=128gb&color=red", phone.id),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stock"], 2);
    assert_eq!(body["data"]["variant_key"], "color:red|storage:128gb");

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}/stock?color=green&storage=128gb", phone.id),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gateway_callbacks_reject_bad_signatures() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/payments/vnpay/ipn?vnp_TxnRef=TXN1&vnp_Amount=100&vnp_ResponseCode=00&vnp_SecureHash=abcd",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"RspCode": "97", "Message": "Invalid signature"}));

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/payments/momo/notify",
            Some(json!({
                "partnerCode": "MOMO",
                "orderId": "TXN1",
                "requestId": "TXN1",
                "amount": 1000,
                "resultCode": 0,
                "signature": "deadbeef"
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
