use crate::{
    db::with_transaction,
    entities::{cart, cart_item, product, product_variant},
    errors::ServiceError,
    services::{
        inventory::InventoryLedger,
        variants::{VariantKey, VariantOptions},
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddCartItemRequest {
    pub product_id: i32,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
    /// Selected options, e.g. `{"color": "red", "storage": "128gb"}`
    #[serde(default)]
    #[schema(value_type = Object)]
    pub options: serde_json::Value,
    #[validate(length(max = 512))]
    pub variant_image: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartItemView {
    pub id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    pub options: VariantOptions,
    pub variant_key: Option<String>,
    pub variant_image: Option<String>,
    /// Variant price override, else the product price (VND)
    pub unit_price: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub cart_id: Option<i32>,
    pub user_id: i32,
    pub items: Vec<CartItemView>,
    pub total_amount: i64,
}

/// Per-user staging area for checkout; holds no stock.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_cart(&self, user_id: i32) -> Result<CartView, ServiceError> {
        let db = self.db.as_ref();
        let Some(cart) = find_cart(db, user_id).await? else {
            return Ok(CartView {
                cart_id: None,
                user_id,
                items: Vec::new(),
                total_amount: 0,
            });
        };
        let items = cart
            .find_related(cart_item::Entity)
            .order_by_asc(cart_item::Column::Id)
            .all(db)
            .await?;

        let mut views = Vec::with_capacity(items.len());
        for item in items {
            views.push(item_view(db, item).await?);
        }
        let total_amount = views
            .iter()
            .map(|v| v.unit_price * i64::from(v.quantity))
            .sum();

        Ok(CartView {
            cart_id: Some(cart.id),
            user_id,
            items: views,
            total_amount,
        })
    }

    /// Adds a line, merging into an existing line that resolves to the same variant.
    #[instrument(skip(self, request), fields(product_id = request.product_id, quantity = request.quantity))]
    pub async fn add_item(
        &self,
        user_id: i32,
        request: AddCartItemRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;
        let options = VariantOptions::from_json_value(&request.options)?;
        let key = options.variant_key();

        with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                let product = product::Entity::find_by_id(request.product_id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Product {} not found", request.product_id))
                    })?;
                options.typed(product.kind())?;

                let now = Utc::now();
                let cart = match find_cart(txn, user_id).await? {
                    Some(cart) => cart,
                    None => {
                        cart::ActiveModel {
                            user_id: Set(user_id),
                            created_at: Set(now),
                            updated_at: Set(now),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await?
                    }
                };

                let existing =
                    find_matching_line(txn, cart.id, request.product_id, key.as_ref()).await?;
                let wanted = existing.as_ref().map_or(0, |line| line.quantity) + request.quantity;

                if !InventoryLedger::check_stock(txn, request.product_id, key.as_ref(), wanted)
                    .await?
                {
                    return Err(ServiceError::InsufficientStock(format!(
                        "product {} has fewer than {} units available",
                        request.product_id, wanted
                    )));
                }

                match existing {
                    Some(line) => {
                        let mut active: cart_item::ActiveModel = line.into();
                        active.quantity = Set(wanted);
                        if request.variant_image.is_some() {
                            active.variant_image = Set(request.variant_image);
                        }
                        active.updated_at = Set(now);
                        active.update(txn).await?;
                    }
                    None => {
                        cart_item::ActiveModel {
                            cart_id: Set(cart.id),
                            product_id: Set(request.product_id),
                            quantity: Set(wanted),
                            options: Set(options.to_json()),
                            variant_image: Set(request.variant_image),
                            created_at: Set(now),
                            updated_at: Set(now),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await?;
                    }
                }
                Ok::<_, ServiceError>(())
            })
        })
        .await?;

        info!(user_id, "cart item added");
        self.get_cart(user_id).await
    }

    pub async fn update_quantity(
        &self,
        user_id: i32,
        item_id: i32,
        request: UpdateCartItemRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;
        let db = self.db.as_ref();
        let item = owned_item(db, user_id, item_id).await?;

        let options = VariantOptions::parse_json(item.options.as_deref())?;
        let key = options.variant_key();
        if !InventoryLedger::check_stock(db, item.product_id, key.as_ref(), request.quantity).await?
        {
            return Err(ServiceError::InsufficientStock(format!(
                "product {} has fewer than {} units available",
                item.product_id, request.quantity
            )));
        }

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(request.quantity);
        active.updated_at = Set(Utc::now());
        active.update(db).await?;

        self.get_cart(user_id).await
    }

    pub async fn remove_item(&self, user_id: i32, item_id: i32) -> Result<CartView, ServiceError> {
        let db = self.db.as_ref();
        let item = owned_item(db, user_id, item_id).await?;
        item.delete(db).await?;
        self.get_cart(user_id).await
    }

    /// Empties the cart, keeping the cart row. Returns the number of removed lines.
    pub async fn clear_cart(&self, user_id: i32) -> Result<u64, ServiceError> {
        let db = self.db.as_ref();
        let Some(cart) = find_cart(db, user_id).await? else {
            return Ok(0);
        };
        let removed = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(db)
            .await?
            .rows_affected;
        Ok(removed)
    }
}

async fn find_cart<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> Result<Option<cart::Model>, ServiceError> {
    Ok(cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(db)
        .await?)
}

async fn find_matching_line<C: ConnectionTrait>(
    db: &C,
    cart_id: i32,
    product_id: i32,
    key: Option<&VariantKey>,
) -> Result<Option<cart_item::Model>, ServiceError> {
    let lines = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .filter(cart_item::Column::ProductId.eq(product_id))
        .all(db)
        .await?;
    for line in lines {
        let line_key = VariantOptions::parse_json(line.options.as_deref())?.variant_key();
        if line_key.as_ref() == key {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

/// Items outside the caller's cart are reported as missing
async fn owned_item<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    item_id: i32,
) -> Result<cart_item::Model, ServiceError> {
    let not_found = || ServiceError::NotFound(format!("Cart item {} not found", item_id));
    let item = cart_item::Entity::find_by_id(item_id)
        .one(db)
        .await?
        .ok_or_else(not_found)?;
    let owner = cart::Entity::find_by_id(item.cart_id).one(db).await?;
    match owner {
        Some(cart) if cart.user_id == user_id => Ok(item),
        _ => Err(not_found()),
    }
}

async fn item_view<C: ConnectionTrait>(
    db: &C,
    item: cart_item::Model,
) -> Result<CartItemView, ServiceError> {
    let product = product::Entity::find_by_id(item.product_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", item.product_id)))?;
    let options = VariantOptions::parse_json(item.options.as_deref())?;
    let key = options.variant_key();

    let mut unit_price = product.price;
    if let Some(key) = &key {
        let variant = product_variant::Entity::find()
            .filter(product_variant::Column::ProductId.eq(product.id))
            .filter(product_variant::Column::VariantKey.eq(key.as_str()))
            .one(db)
            .await?;
        if let Some(price) = variant.and_then(|v| v.price) {
            unit_price = price;
        }
    }

    Ok(CartItemView {
        id: item.id,
        product_id: item.product_id,
        product_name: product.name,
        quantity: item.quantity,
        options,
        variant_key: key.map(|k| k.to_string()),
        variant_image: item.variant_image,
        unit_price,
    })
}
