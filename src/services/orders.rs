use crate::{
    auth::AuthUser,
    db::with_transaction,
    entities::{
        order::{self, OrderPaymentStatus, OrderStatus},
        order_item, payment, product, PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    services::{cart::CartService, inventory::InventoryLedger, variants::VariantOptions},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

/// One requested order line
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderLineRequest {
    pub product_id: i32,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
    /// Unit price in VND as shown in the client's cart
    #[validate(range(min = 0))]
    pub unit_price: i64,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 1000, message = "Shipping address is required"))]
    pub shipping_address: String,
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1, message = "An order needs at least one item"))]
    pub items: Vec<OrderLineRequest>,
    /// Empty the caller's cart once the order is committed
    #[serde(default = "default_true")]
    pub clear_cart: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// `processing`, `shipped`, `delivered` or `cancelled`
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdatePaymentStatusRequest {
    /// `paid` or `failed`
    pub payment_status: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemView {
    pub id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: i64,
    pub options: VariantOptions,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderDetail {
    pub id: i32,
    pub user_id: i32,
    pub total_amount: i64,
    pub shipping_address: String,
    pub payment_method: String,
    pub status: String,
    pub payment_status: String,
    #[schema(value_type = Option<Object>)]
    pub payment_details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
}

impl OrderDetail {
    fn build(order: order::Model, items: Vec<order_item::Model>) -> Result<Self, ServiceError> {
        let items = items
            .into_iter()
            .map(|item| {
                Ok(OrderItemView {
                    id: item.id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.price,
                    options: VariantOptions::parse_json(item.options.as_deref())?,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;
        let payment_details = order
            .payment_details
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Self {
            id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            shipping_address: order.shipping_address,
            payment_method: order.payment_method,
            status: order.status,
            payment_status: order.payment_status,
            payment_details,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items,
        })
    }
}

/// A validated line ready for the transaction
struct PreparedLine {
    product_id: i32,
    quantity: i32,
    unit_price: i64,
    options: VariantOptions,
}

/// Order creation, lookup, status machine and cancellation
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    cart: CartService,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, cart: CartService) -> Self {
        Self { db, cart }
    }

    /// Creates an order and takes its stock in one transaction.
    ///
    /// Lines are decremented in the order given; the first line whose guard fails aborts the
    /// whole order with `InsufficientStock` and nothing is persisted.
    #[instrument(skip(self, request), fields(user_id = caller.user_id, lines = request.items.len()))]
    pub async fn create_order(
        &self,
        caller: AuthUser,
        request: CreateOrderRequest,
    ) -> Result<OrderDetail, ServiceError> {
        request.validate()?;
        let mut lines = Vec::with_capacity(request.items.len());
        let mut total_amount: i64 = 0;
        for item in &request.items {
            item.validate()?;
            let line_total = item
                .unit_price
                .checked_mul(i64::from(item.quantity))
                .and_then(|amount| total_amount.checked_add(amount))
                .ok_or_else(|| ServiceError::ValidationError("order total overflows".into()))?;
            total_amount = line_total;
            lines.push(PreparedLine {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                options: VariantOptions::from_json_value(&item.options)?,
            });
        }

        let user_id = caller.user_id;
        let shipping_address = request.shipping_address.trim().to_string();
        let payment_method = request.payment_method;

        let (order, items) = with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                for line in &lines {
                    let product = product::Entity::find_by_id(line.product_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Product {} not found", line.product_id))
                        })?;
                    line.options.typed(product.kind())?;
                }

                let now = Utc::now();
                let order = order::ActiveModel {
                    user_id: Set(user_id),
                    total_amount: Set(total_amount),
                    shipping_address: Set(shipping_address),
                    payment_method: Set(payment_method.to_string()),
                    status: Set(OrderStatus::Pending.to_string()),
                    payment_status: Set(OrderPaymentStatus::Pending.to_string()),
                    payment_details: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await?;

                let mut items = Vec::with_capacity(lines.len());
                for line in lines {
                    let item = order_item::ActiveModel {
                        order_id: Set(order.id),
                        product_id: Set(line.product_id),
                        quantity: Set(line.quantity),
                        price: Set(line.unit_price),
                        options: Set(line.options.to_json()),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await?;

                    let key = line.options.variant_key();
                    if !InventoryLedger::decrement_stock(
                        txn,
                        line.product_id,
                        key.as_ref(),
                        line.quantity,
                    )
                    .await?
                    {
                        return Err(ServiceError::InsufficientStock(format!(
                            "product {}{} requested {}",
                            line.product_id,
                            key.map(|k| format!(" ({})", k)).unwrap_or_default(),
                            line.quantity
                        )));
                    }
                    items.push(item);
                }

                Ok::<_, ServiceError>((order, items))
            })
        })
        .await?;

        info!(
            order_id = order.id,
            user_id,
            total_amount = order.total_amount,
            "order created"
        );

        if request.clear_cart {
            if let Err(e) = self.cart.clear_cart(user_id).await {
                warn!(order_id = order.id, error = %e, "failed to clear cart after order");
            }
        }

        OrderDetail::build(order, items)
    }

    pub async fn get_order(&self, caller: AuthUser, order_id: i32) -> Result<OrderDetail, ServiceError> {
        let db = self.db.as_ref();
        let order = find_order(db, order_id).await?;
        caller.ensure_owner_or_admin(order.user_id)?;
        let items = order_items(db, order.id).await?;
        OrderDetail::build(order, items)
    }

    /// The caller's orders, newest first; admins see every order
    pub async fn list_orders(&self, caller: AuthUser) -> Result<Vec<OrderDetail>, ServiceError> {
        let mut query = order::Entity::find().order_by_desc(order::Column::Id);
        if !caller.is_admin() {
            query = query.filter(order::Column::UserId.eq(caller.user_id));
        }
        query
            .find_with_related(order_item::Entity)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|(order, items)| OrderDetail::build(order, items))
            .collect()
    }

    /// Cancels a pending order by restoring its stock and deleting the order, its items and
    /// its payments in one transaction.
    #[instrument(skip(self), fields(user_id = caller.user_id))]
    pub async fn cancel_order(&self, caller: AuthUser, order_id: i32) -> Result<(), ServiceError> {
        let order = find_order(self.db.as_ref(), order_id).await?;
        caller.ensure_owner_or_admin(order.user_id)?;
        ensure_cancellable(&order)?;

        with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                let items = order_items(txn, order_id).await?;
                restore_items(txn, &items).await?;

                payment::Entity::delete_many()
                    .filter(payment::Column::OrderId.eq(order_id))
                    .exec(txn)
                    .await?;
                order_item::Entity::delete_many()
                    .filter(order_item::Column::OrderId.eq(order_id))
                    .exec(txn)
                    .await?;
                let deleted = order::Entity::delete_many()
                    .filter(order::Column::Id.eq(order_id))
                    .filter(order::Column::Status.eq(OrderStatus::Pending.as_ref()))
                    .exec(txn)
                    .await?
                    .rows_affected;
                if deleted != 1 {
                    return Err(ServiceError::InvalidStateTransition(format!(
                        "order {} left pending before it could be cancelled",
                        order_id
                    )));
                }
                Ok::<_, ServiceError>(())
            })
        })
        .await?;

        info!(order_id, "order cancelled and removed");
        Ok(())
    }

    /// Admin status change along pending → processing → shipped → delivered.
    ///
    /// Re-sending the current status is a no-op. `cancelled` is accepted only from an unpaid
    /// `pending` order; it restores stock and keeps the order row.
    #[instrument(skip(self), fields(user_id = caller.user_id))]
    pub async fn update_status(
        &self,
        caller: AuthUser,
        order_id: i32,
        status: &str,
    ) -> Result<OrderDetail, ServiceError> {
        caller.ensure_admin()?;
        let target: OrderStatus = status.trim().parse().map_err(|_| {
            ServiceError::InvalidStateTransition(format!("unknown order status '{}'", status))
        })?;

        let order = find_order(self.db.as_ref(), order_id).await?;
        let current = stored_status(&order)?;
        if current == target {
            return self.get_order(caller, order_id).await;
        }
        check_transition(current, target)?;
        let cancelling = target == OrderStatus::Cancelled;
        if cancelling && order.payment_status == OrderPaymentStatus::Paid.as_ref() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "order {} is paid and can no longer be cancelled",
                order_id
            )));
        }

        with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                let mut update = order::Entity::update_many()
                    .col_expr(order::Column::Status, Expr::value(target.as_ref()))
                    .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(order::Column::Id.eq(order_id))
                    .filter(order::Column::Status.eq(current.as_ref()));
                if cancelling {
                    update = update.filter(
                        order::Column::PaymentStatus.ne(OrderPaymentStatus::Paid.as_ref()),
                    );
                }
                let updated = update.exec(txn).await?.rows_affected;
                if updated != 1 {
                    return Err(ServiceError::InvalidStateTransition(format!(
                        "order {} changed status concurrently",
                        order_id
                    )));
                }
                if cancelling {
                    let items = order_items(txn, order_id).await?;
                    restore_items(txn, &items).await?;
                }
                Ok::<_, ServiceError>(())
            })
        })
        .await?;

        info!(order_id, from = %current, to = %target, "order status updated");
        self.get_order(caller, order_id).await
    }

    /// Admin override of the order's payment status.
    ///
    /// `paid` is allowed from pending or failed and completes the latest payment; `failed`
    /// is allowed from pending and fails the latest pending payment. A paid order is final.
    #[instrument(skip(self), fields(user_id = caller.user_id))]
    pub async fn update_payment_status(
        &self,
        caller: AuthUser,
        order_id: i32,
        payment_status: &str,
    ) -> Result<OrderDetail, ServiceError> {
        caller.ensure_admin()?;
        let target: OrderPaymentStatus = payment_status.trim().parse().map_err(|_| {
            ServiceError::InvalidStateTransition(format!(
                "unknown payment status '{}'",
                payment_status
            ))
        })?;

        let order = find_order(self.db.as_ref(), order_id).await?;
        let current: OrderPaymentStatus = order.payment_status().map_err(|_| {
            ServiceError::InternalError(format!("order {} has an unknown payment status", order_id))
        })?;

        match (current, target) {
            (OrderPaymentStatus::Paid, _) => return Err(ServiceError::AlreadyPaid(order_id)),
            (_, OrderPaymentStatus::Pending) => {
                return Err(ServiceError::InvalidStateTransition(
                    "payment status cannot be reset to pending".to_string(),
                ))
            }
            (OrderPaymentStatus::Failed, OrderPaymentStatus::Failed) => {
                return self.get_order(caller, order_id).await
            }
            (_, OrderPaymentStatus::Paid) => ensure_not_cancelled(&order)?,
            _ => {}
        }

        with_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                match target {
                    OrderPaymentStatus::Paid => {
                        if !mark_order_paid(txn, order_id, None).await? {
                            ensure_not_cancelled(&find_order(txn, order_id).await?)?;
                            return Err(ServiceError::AlreadyPaid(order_id));
                        }
                        if let Some(latest) = latest_payment(txn, order_id).await? {
                            set_payment_status(txn, latest, PaymentStatus::Completed, None)
                                .await?;
                        }
                    }
                    _ => {
                        let updated = order::Entity::update_many()
                            .col_expr(
                                order::Column::PaymentStatus,
                                Expr::value(OrderPaymentStatus::Failed.as_ref()),
                            )
                            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                            .filter(order::Column::Id.eq(order_id))
                            .filter(
                                order::Column::PaymentStatus
                                    .eq(OrderPaymentStatus::Pending.as_ref()),
                            )
                            .exec(txn)
                            .await?
                            .rows_affected;
                        if updated != 1 {
                            return Err(ServiceError::InvalidStateTransition(format!(
                                "order {} payment is no longer pending",
                                order_id
                            )));
                        }
                        if let Some(latest) = latest_payment(txn, order_id).await? {
                            if latest.status == PaymentStatus::Pending.as_ref() {
                                set_payment_status(txn, latest, PaymentStatus::Failed, None)
                                    .await?;
                            }
                        }
                    }
                }
                Ok::<_, ServiceError>(())
            })
        })
        .await?;

        info!(order_id, from = %current, to = %target, "order payment status updated");
        self.get_order(caller, order_id).await
    }
}

fn stored_status(order: &order::Model) -> Result<OrderStatus, ServiceError> {
    order.status().map_err(|_| {
        ServiceError::InternalError(format!("order {} has an unknown status", order.id))
    })
}

fn ensure_cancellable(order: &order::Model) -> Result<(), ServiceError> {
    let status = stored_status(order)?;
    if status.is_cancellable() {
        Ok(())
    } else {
        Err(ServiceError::InvalidStateTransition(format!(
            "order {} is {} and can no longer be cancelled",
            order.id, status
        )))
    }
}

pub(crate) fn ensure_not_cancelled(order: &order::Model) -> Result<(), ServiceError> {
    if order.status == OrderStatus::Cancelled.as_ref() {
        Err(ServiceError::InvalidStateTransition(format!(
            "order {} is cancelled",
            order.id
        )))
    } else {
        Ok(())
    }
}

/// Validates a status change other than a same-status no-op
pub fn check_transition(current: OrderStatus, target: OrderStatus) -> Result<(), ServiceError> {
    let allowed = match (current.rank(), target.rank()) {
        (Some(_), None) => current.is_cancellable(),
        (Some(from), Some(to)) => to > from,
        (None, _) => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(ServiceError::InvalidStateTransition(format!(
            "cannot move order from {} to {}",
            current, target
        )))
    }
}

pub(crate) async fn find_order<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

async fn order_items<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Id)
        .all(db)
        .await?)
}

/// Compensation for a committed order: every snapshotted line goes back to the unit it
/// was taken from.
async fn restore_items<C: ConnectionTrait>(
    db: &C,
    items: &[order_item::Model],
) -> Result<(), ServiceError> {
    for item in items {
        let key = VariantOptions::parse_json(item.options.as_deref())?.variant_key();
        InventoryLedger::restore_stock(db, item.product_id, key.as_ref(), item.quantity).await?;
    }
    Ok(())
}

/// Most recent payment attempt for an order
pub(crate) async fn latest_payment<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
) -> Result<Option<payment::Model>, ServiceError> {
    Ok(payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .order_by_desc(payment::Column::CreatedAt)
        .order_by_desc(payment::Column::Id)
        .one(db)
        .await?)
}

/// Sets the order's payment status to paid unless it already is or the order was cancelled.
///
/// Returns `false` when no row changed.
async fn mark_order_paid<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
    payment_details: Option<String>,
) -> Result<bool, ServiceError> {
    let mut update = order::Entity::update_many()
        .col_expr(
            order::Column::PaymentStatus,
            Expr::value(OrderPaymentStatus::Paid.as_ref()),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()));
    if let Some(details) = payment_details {
        update = update.col_expr(order::Column::PaymentDetails, Expr::value(details));
    }
    let updated = update
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::PaymentStatus.ne(OrderPaymentStatus::Paid.as_ref()))
        .filter(order::Column::Status.ne(OrderStatus::Cancelled.as_ref()))
        .exec(db)
        .await?
        .rows_affected;
    Ok(updated == 1)
}

/// Marks the order of a completing payment as paid.
///
/// An order that is already paid is left alone; a cancelled order is refused.
pub(crate) async fn pay_order<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
    payment_details: Option<String>,
) -> Result<(), ServiceError> {
    ensure_not_cancelled(&find_order(db, order_id).await?)?;
    if !mark_order_paid(db, order_id, payment_details).await? {
        ensure_not_cancelled(&find_order(db, order_id).await?)?;
    }
    Ok(())
}

/// Updates one payment row, optionally replacing its stored provider data
pub(crate) async fn set_payment_status<C: ConnectionTrait>(
    db: &C,
    payment: payment::Model,
    status: PaymentStatus,
    payment_data: Option<String>,
) -> Result<payment::Model, ServiceError> {
    let mut active: payment::ActiveModel = payment.into();
    active.status = Set(status.to_string());
    if let Some(data) = payment_data {
        active.payment_data = Set(Some(data));
    }
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Processing, true)]
    #[case(OrderStatus::Pending, OrderStatus::Shipped, true)]
    #[case(OrderStatus::Processing, OrderStatus::Delivered, true)]
    #[case(OrderStatus::Pending, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Processing, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Shipped, false)]
    #[case(OrderStatus::Processing, OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Shipped, OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Pending, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Processing, false)]
    fn status_transitions(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] allowed: bool,
    ) {
        let result = check_transition(from, to);
        assert_eq!(result.is_ok(), allowed, "{from} -> {to}");
        if !allowed {
            assert!(matches!(result, Err(ServiceError::InvalidStateTransition(_))));
        }
    }
}
