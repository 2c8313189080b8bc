use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "TechShop API",
        version = "0.1.0",
        description = r#"
# TechShop checkout API

Orders, stock, carts and payments for the TechShop storefront.

## Authentication

Customer and admin endpoints expect a bearer token:

```
Authorization: Bearer <your-jwt-token>
```

Gateway callbacks (`/payments/vnpay/*`, `/payments/momo/notify`) carry no token; they are
authenticated by the provider's HMAC signature.

## Money

All amounts are integer VND.

## Error Handling

```json
{
  "error": "Unprocessable Entity",
  "message": "Insufficient stock: product 12 (color:red|storage:128gb) requested 3",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order creation, cancellation and status"),
        (name = "Payments", description = "Payment intents and gateway callbacks"),
        (name = "Cart", description = "Per-user shopping cart"),
        (name = "Products", description = "Variant stock management"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::update_payment_status,

        // Payments
        crate::handlers::payments::process_payment,
        crate::handlers::payments::check_payment,
        crate::handlers::payments::bank_qr,
        crate::handlers::payments::confirm_payment,
        crate::handlers::payments::vnpay_return,
        crate::handlers::payments::vnpay_ipn,
        crate::handlers::payments::momo_notify,

        // Cart
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_item,
        crate::handlers::cart::update_item,
        crate::handlers::cart::remove_item,
        crate::handlers::cart::clear_cart,

        // Products
        crate::handlers::products::sync_variants,
        crate::handlers::products::get_stock,

        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::entities::OrderStatus,
            crate::entities::OrderPaymentStatus,
            crate::entities::PaymentMethod,
            crate::entities::PaymentStatus,
            crate::services::variants::VariantOptions,
            crate::services::variants::VariantDefinition,
            crate::services::variants::VariantChoice,
            crate::services::variants::PhoneOptions,
            crate::services::variants::LaptopOptions,
            crate::services::payments::PaymentIntent,
            crate::services::payments::BankTransferAccount,
            crate::entities::bank_account::Model,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Serves the generated document at `/api-docs/openapi.json`
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}
