#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use techshop_api::{
    app_router,
    auth::{AuthUser, Role},
    config::AppConfig,
    db::{self, DbConfig},
    entities::{bank_account, product, product_variant},
    services::{
        inventory::VariantRow,
        variants::{ProductKind, VariantOptions},
    },
    AppState,
};
use tower::ServiceExt;

pub const CUSTOMER_ID: i32 = 7;
pub const OTHER_CUSTOMER_ID: i32 = 8;
pub const ADMIN_ID: i32 = 1;
pub const VNPAY_SECRET: &str = "TESTVNPAYSECRETKEY0123456789ABCD";

/// Configuration suitable for tests; gateways point at sandbox defaults.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "test_secret_key_for_testing_purposes_only_32chars".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.vnpay.tmn_code = "TECHSHOP".to_string();
    cfg.vnpay.hash_secret = VNPAY_SECRET.to_string();
    cfg.gateway_timeout_secs = 5;
    cfg
}

/// Helper harness for spinning up an application backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _data_dir: Option<TempDir>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        Self::build(cfg, DbConfig::in_memory_sqlite(), None).await
    }

    /// App on a SQLite file with several pooled connections, for tests that need statements
    /// from different tasks to contend.
    pub async fn file_backed(max_connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db_config = DbConfig::sqlite_file(&dir.path().join("techshop.db"), max_connections);
        Self::build(test_config(), db_config, Some(dir)).await
    }

    async fn build(cfg: AppConfig, db_config: DbConfig, data_dir: Option<TempDir>) -> Self {
        let pool = db::establish_connection_with_config(&db_config)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let state = AppState::new(Arc::new(pool), cfg).expect("failed to build app state");
        let router = app_router(state.clone());
        Self {
            router,
            state,
            _data_dir: data_dir,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.state.db.as_ref()
    }

    pub fn token(&self, user_id: i32, role: Role) -> String {
        self.state
            .auth
            .issue_token(user_id, role)
            .expect("failed to issue token")
    }

    pub fn customer_token(&self) -> String {
        self.token(CUSTOMER_ID, Role::User)
    }

    pub fn admin_token(&self) -> String {
        self.token(ADMIN_ID, Role::Admin)
    }

    /// Sends one request through the full router and returns status plus parsed JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    pub async fn seed_product(&self, name: &str, price: i64, stock: i32, kind: ProductKind) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            product_type: Set(kind.to_string()),
            variants: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("failed to seed product")
    }

    /// Seeds a phone whose variant rows hold the given stock; the aggregate follows.
    pub async fn seed_phone(
        &self,
        name: &str,
        price: i64,
        variants: &[(&[(&str, &str)], i32)],
    ) -> product::Model {
        let product = self.seed_product(name, price, 0, ProductKind::Phone).await;
        let rows = variants
            .iter()
            .map(|(pairs, stock)| VariantRow {
                options: options(pairs),
                stock: *stock,
                price: None,
                sku: None,
            })
            .collect();
        self.state
            .services
            .inventory
            .sync_variants(product.id, None, rows)
            .await
            .expect("failed to seed variants");
        self.product(product.id).await
    }

    pub async fn seed_bank_account(&self, bank: &str, number: &str, holder: &str) -> bank_account::Model {
        bank_account::ActiveModel {
            bank_name: Set(bank.to_string()),
            account_number: Set(number.to_string()),
            account_holder: Set(holder.to_string()),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("failed to seed bank account")
    }

    pub async fn product(&self, id: i32) -> product::Model {
        product::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("product query failed")
            .expect("product should exist")
    }

    pub async fn variants(&self, product_id: i32) -> Vec<product_variant::Model> {
        use sea_orm::{ColumnTrait, QueryFilter, QueryOrder};
        product_variant::Entity::find()
            .filter(product_variant::Column::ProductId.eq(product_id))
            .order_by_asc(product_variant::Column::Id)
            .all(self.db())
            .await
            .expect("variant query failed")
    }
}

pub fn options(pairs: &[(&str, &str)]) -> VariantOptions {
    VariantOptions::from_pairs(pairs.iter().copied()).expect("valid options")
}

pub fn customer() -> AuthUser {
    AuthUser::new(CUSTOMER_ID, Role::User)
}

pub fn admin() -> AuthUser {
    AuthUser::new(ADMIN_ID, Role::Admin)
}
