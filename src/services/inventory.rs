use crate::{
    db::with_transaction,
    entities::{product, product_variant},
    errors::ServiceError,
    services::variants::{VariantDefinition, VariantKey, VariantOptions},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

/// Stock counters for products and their variants.
///
/// Every operation runs on the connection it is given, normally an open transaction, so a
/// failed decrement later in the same order rolls back the earlier ones.
pub struct InventoryLedger;

impl InventoryLedger {
    /// Current stock of the resolved unit
    pub async fn get_stock<C: ConnectionTrait>(
        db: &C,
        product_id: i32,
        key: Option<&VariantKey>,
    ) -> Result<i32, ServiceError> {
        match key {
            None => product::Entity::find_by_id(product_id)
                .one(db)
                .await?
                .map(|p| p.stock)
                .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id))),
            Some(key) => find_variant(db, product_id, key)
                .await?
                .map(|v| v.stock)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Variant {} of product {} not found",
                        key, product_id
                    ))
                }),
        }
    }

    /// True iff the resolved unit holds at least `qty`.
    ///
    /// The answer may be stale by the time a decrement runs; the decrement re-checks.
    pub async fn check_stock<C: ConnectionTrait>(
        db: &C,
        product_id: i32,
        key: Option<&VariantKey>,
        qty: i32,
    ) -> Result<bool, ServiceError> {
        if key.is_none() {
            ensure_no_variants(db, product_id).await?;
        }
        match Self::get_stock(db, product_id, key).await {
            Ok(stock) => Ok(stock >= qty),
            Err(ServiceError::NotFound(_)) if key.is_some() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Subtracts `qty` only if enough stock remains, in a single conditional UPDATE.
    ///
    /// Returns `false` and leaves every counter unchanged when the guard fails. A variant
    /// decrement also lowers the product aggregate.
    #[instrument(skip(db))]
    pub async fn decrement_stock<C: ConnectionTrait>(
        db: &C,
        product_id: i32,
        key: Option<&VariantKey>,
        qty: i32,
    ) -> Result<bool, ServiceError> {
        if qty <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be positive, got {}",
                qty
            )));
        }

        let Some(key) = key else {
            ensure_no_variants(db, product_id).await?;
            let ok = guarded_product_decrement(db, product_id, qty).await?;
            if !ok {
                warn!(product_id, qty, "stock guard rejected product decrement");
            }
            return Ok(ok);
        };

        let now = Utc::now();
        let variant_rows = product_variant::Entity::update_many()
            .col_expr(
                product_variant::Column::Stock,
                Expr::col(product_variant::Column::Stock).sub(qty),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
            .filter(product_variant::Column::ProductId.eq(product_id))
            .filter(product_variant::Column::VariantKey.eq(key.as_str()))
            .filter(product_variant::Column::Stock.gte(qty))
            .exec(db)
            .await?
            .rows_affected;

        if variant_rows != 1 {
            warn!(product_id, qty, "stock guard rejected variant decrement");
            return Ok(false);
        }

        if !guarded_product_decrement(db, product_id, qty).await? {
            // Aggregate fell below its variants; undo so the call stays a no-op.
            warn!(
                product_id,
                qty, "product aggregate lower than variant stock, reverting variant decrement"
            );
            increment_variant(db, product_id, key, qty).await?;
            return Ok(false);
        }

        Ok(true)
    }

    /// Adds `qty` back to the resolved unit and, for a variant, to the product aggregate.
    ///
    /// Only ever reverses an earlier decrement, so there is no upper bound. Units that no
    /// longer exist are skipped with a warning.
    #[instrument(skip(db))]
    pub async fn restore_stock<C: ConnectionTrait>(
        db: &C,
        product_id: i32,
        key: Option<&VariantKey>,
        qty: i32,
    ) -> Result<(), ServiceError> {
        if let Some(key) = key {
            if increment_variant(db, product_id, key, qty).await? == 0 {
                warn!(product_id, qty, "variant row missing during restore");
            }
        }

        let product_rows = product::Entity::update_many()
            .col_expr(product::Column::Stock, Expr::col(product::Column::Stock).add(qty))
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(db)
            .await?
            .rows_affected;
        if product_rows == 0 {
            warn!(product_id, qty, "product missing during restore");
        }
        Ok(())
    }
}

async fn find_variant<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
    key: &VariantKey,
) -> Result<Option<product_variant::Model>, ServiceError> {
    Ok(product_variant::Entity::find()
        .filter(product_variant::Column::ProductId.eq(product_id))
        .filter(product_variant::Column::VariantKey.eq(key.as_str()))
        .one(db)
        .await?)
}

/// Products with variant rows keep a derived stock; it cannot be sold directly.
async fn ensure_no_variants<C: ConnectionTrait>(db: &C, product_id: i32) -> Result<(), ServiceError> {
    let variants = product_variant::Entity::find()
        .filter(product_variant::Column::ProductId.eq(product_id))
        .count(db)
        .await?;
    if variants > 0 {
        return Err(ServiceError::MalformedOptions(format!(
            "product {} requires a variant selection",
            product_id
        )));
    }
    Ok(())
}

async fn guarded_product_decrement<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
    qty: i32,
) -> Result<bool, ServiceError> {
    let rows = product::Entity::update_many()
        .col_expr(product::Column::Stock, Expr::col(product::Column::Stock).sub(qty))
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gte(qty))
        .exec(db)
        .await?
        .rows_affected;
    Ok(rows == 1)
}

async fn increment_variant<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
    key: &VariantKey,
    qty: i32,
) -> Result<u64, ServiceError> {
    Ok(product_variant::Entity::update_many()
        .col_expr(
            product_variant::Column::Stock,
            Expr::col(product_variant::Column::Stock).add(qty),
        )
        .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product_variant::Column::ProductId.eq(product_id))
        .filter(product_variant::Column::VariantKey.eq(key.as_str()))
        .exec(db)
        .await?
        .rows_affected)
}

/// Desired state of one variant row
#[derive(Debug, Clone)]
pub struct VariantRow {
    pub options: VariantOptions,
    pub stock: i32,
    pub price: Option<i64>,
    pub sku: Option<String>,
}

/// Stock of a resolved unit, as reported to clients
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StockLevel {
    pub product_id: i32,
    pub variant_key: Option<String>,
    pub stock: i32,
}

/// Admin-facing inventory operations
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upserts variant rows by key and recomputes the product aggregate, in one transaction.
    ///
    /// Rows not mentioned are left as they are. Re-sending the same payload is a no-op.
    #[instrument(skip(self, definition, rows), fields(rows = rows.len()))]
    pub async fn sync_variants(
        &self,
        product_id: i32,
        definition: Option<VariantDefinition>,
        rows: Vec<VariantRow>,
    ) -> Result<Vec<product_variant::Model>, ServiceError> {
        let mut keyed = Vec::with_capacity(rows.len());
        let mut seen = HashSet::new();
        for row in rows {
            if row.stock < 0 {
                return Err(ServiceError::ValidationError(
                    "variant stock cannot be negative".to_string(),
                ));
            }
            let key = row.options.variant_key().ok_or_else(|| {
                ServiceError::MalformedOptions("variant row has no stock-relevant options".into())
            })?;
            if let Some(definition) = &definition {
                if !definition.allows(&key)? {
                    return Err(ServiceError::MalformedOptions(format!(
                        "variant {} is not part of the product definition",
                        key
                    )));
                }
            }
            if !seen.insert(key.clone()) {
                return Err(ServiceError::MalformedOptions(format!(
                    "variant {} listed twice",
                    key
                )));
            }
            keyed.push((key, row));
        }
        let definition_json = definition.as_ref().map(VariantDefinition::to_json).transpose()?;

        let variants = with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                let product = product::Entity::find_by_id(product_id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Product {} not found", product_id))
                    })?;

                let now = Utc::now();
                for (key, row) in keyed {
                    match find_variant(txn, product_id, &key).await? {
                        Some(existing) => {
                            let mut active: product_variant::ActiveModel = existing.into();
                            active.stock = Set(row.stock);
                            active.price = Set(row.price);
                            active.sku = Set(row.sku);
                            active.updated_at = Set(now);
                            active.update(txn).await?;
                        }
                        None => {
                            product_variant::ActiveModel {
                                product_id: Set(product_id),
                                variant_key: Set(key.to_string()),
                                stock: Set(row.stock),
                                price: Set(row.price),
                                sku: Set(row.sku),
                                created_at: Set(now),
                                updated_at: Set(now),
                                ..Default::default()
                            }
                            .insert(txn)
                            .await?;
                        }
                    }
                }

                let variants = product_variant::Entity::find()
                    .filter(product_variant::Column::ProductId.eq(product_id))
                    .order_by_asc(product_variant::Column::Id)
                    .all(txn)
                    .await?;
                let aggregate: i32 = variants.iter().map(|v| v.stock).sum();

                let mut active: product::ActiveModel = product.into();
                active.stock = Set(aggregate);
                if let Some(json) = definition_json {
                    active.variants = Set(Some(json));
                }
                active.updated_at = Set(now);
                active.update(txn).await?;

                Ok::<_, ServiceError>(variants)
            })
        })
        .await?;

        info!(product_id, variants = variants.len(), "variants synchronized");
        Ok(variants)
    }

    /// Stock of the unit a selection resolves to
    pub async fn stock_level(
        &self,
        product_id: i32,
        options: &VariantOptions,
    ) -> Result<StockLevel, ServiceError> {
        let key = options.variant_key();
        if key.is_none() {
            // Products with variants report their derived aggregate here.
            let product = product::Entity::find_by_id(product_id)
                .one(self.db.as_ref())
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
            return Ok(StockLevel {
                product_id,
                variant_key: None,
                stock: product.stock,
            });
        }
        let stock = InventoryLedger::get_stock(self.db.as_ref(), product_id, key.as_ref()).await?;
        Ok(StockLevel {
            product_id,
            variant_key: key.map(|k| k.to_string()),
            stock,
        })
    }
}
