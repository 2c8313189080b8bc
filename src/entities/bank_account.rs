use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Receiving bank account shown for bank-transfer payments
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "bank_accounts")]
#[schema(as = BankAccount)]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Short bank identifier understood by VietQR (e.g. `VCB`, `MB`)
    pub bank_name: String,
    pub account_number: String,
    pub account_holder: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
