/*!
 * Scoped transaction helper
 *
 * Every multi-statement write (order creation, cancellation, variant sync, callback
 * settlement) runs through `with_transaction`: the closure's `Ok` commits, an `Err` or an
 * early drop rolls back.
 */

use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionError, TransactionTrait};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Execute a function within a database transaction
///
/// The closure receives the open transaction and must capture only owned data.
///
/// ```rust,ignore
/// use crate::db::transaction::with_transaction;
///
/// let order_id = with_transaction(&db, move |txn| {
///     Box::pin(async move {
///         let order = order::ActiveModel { .. }.insert(txn).await?;
///         InventoryLedger::decrement_stock(txn, product_id, key.as_ref(), qty).await?;
///         Ok(order.id)
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<F, T, E>(db: &DatabaseConnection, f: F) -> Result<T, E>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T, E>> + Send,
    T: Send,
    E: std::error::Error + From<DbErr> + Send,
{
    db.transaction::<F, T, E>(f).await.map_err(|e| match e {
        TransactionError::Connection(db_err) => E::from(db_err),
        TransactionError::Transaction(err) => err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::bank_account;
    use crate::errors::ServiceError;
    use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};

    async fn pool() -> DatabaseConnection {
        let db = establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        db
    }

    fn account(number: &str) -> bank_account::ActiveModel {
        bank_account::ActiveModel {
            bank_name: Set("VCB".into()),
            account_number: Set(number.into()),
            account_holder: Set("TECHSHOP".into()),
            is_active: Set(true),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn commits_on_ok() {
        let db = pool().await;
        let id = with_transaction(&db, |txn| {
            Box::pin(async move {
                let row = account("0011").insert(txn).await?;
                Ok::<_, ServiceError>(row.id)
            })
        })
        .await
        .unwrap();

        assert!(bank_account::Entity::find_by_id(id)
            .one(&db)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn rolls_back_on_err_and_returns_the_error_untouched() {
        let db = pool().await;
        let result: Result<(), ServiceError> = with_transaction(&db, |txn| {
            Box::pin(async move {
                account("0022").insert(txn).await?;
                Err(ServiceError::InsufficientStock("product 1".into()))
            })
        })
        .await;

        assert!(matches!(result, Err(ServiceError::InsufficientStock(_))));
        assert_eq!(bank_account::Entity::find().count(&db).await.unwrap(), 0);
    }
}
