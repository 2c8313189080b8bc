use crate::{
    auth::AuthUser,
    entities::product_variant,
    errors::ServiceError,
    handlers::AppState,
    services::{
        inventory::{StockLevel, VariantRow},
        variants::{VariantDefinition, VariantOptions},
    },
    ApiResponse,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct VariantRowRequest {
    /// Option selection naming the variant, e.g. `{"color": "red", "storage": "128gb"}`
    #[schema(value_type = Object)]
    pub options: serde_json::Value,
    #[validate(range(min = 0))]
    pub stock: i32,
    #[validate(range(min = 0))]
    pub price: Option<i64>,
    #[validate(length(max = 100))]
    pub sku: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SyncVariantsRequest {
    /// Replaces the stored definition when present
    #[serde(default)]
    pub definition: Option<VariantDefinition>,
    #[validate]
    pub variants: Vec<VariantRowRequest>,
}

/// Inventory routes mounted under `/products`
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/:id/variants", put(sync_variants))
        .route("/:id/stock", get(get_stock))
}

/// Upsert a product's variant rows and recompute its aggregate stock
#[utoipa::path(
    put,
    path = "/api/v1/products/{id}/variants",
    params(("id" = i32, Path, description = "Product id")),
    request_body = SyncVariantsRequest,
    responses(
        (status = 200, description = "Variants synchronized", body = ApiResponse<Vec<product_variant::Model>>),
        (status = 400, description = "Invalid variant options", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn sync_variants(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(request): Json<SyncVariantsRequest>,
) -> Result<Json<ApiResponse<Vec<product_variant::Model>>>, ServiceError> {
    user.ensure_admin()?;
    request.validate()?;

    let rows = request
        .variants
        .into_iter()
        .map(|row| {
            Ok(VariantRow {
                options: VariantOptions::from_json_value(&row.options)?,
                stock: row.stock,
                price: row.price,
                sku: row.sku,
            })
        })
        .collect::<Result<Vec<_>, ServiceError>>()?;

    let variants = state
        .services
        .inventory
        .sync_variants(id, request.definition, rows)
        .await?;
    Ok(Json(ApiResponse::success(variants)))
}

/// Stock of the unit an option selection resolves to; options go in the query string
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/stock",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 200, description = "Stock level", body = ApiResponse<StockLevel>),
        (status = 400, description = "Invalid options", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or variant not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Products"
)]
pub async fn get_stock(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(options): Query<BTreeMap<String, String>>,
) -> Result<Json<ApiResponse<StockLevel>>, ServiceError> {
    let options = VariantOptions::from_pairs(options)?;
    let level = state.services.inventory.stock_level(id, &options).await?;
    Ok(Json(ApiResponse::success(level)))
}
