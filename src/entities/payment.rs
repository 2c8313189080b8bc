use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// How the customer pays for an order
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Momo,
    /// VNPay hosted page: domestic ATM, international card and QR
    #[strum(to_string = "vnpay", serialize = "credit_card")]
    #[serde(alias = "credit_card")]
    Vnpay,
    Cod,
}

impl PaymentMethod {
    /// Gateway that settles the payment, if any
    pub fn provider(self) -> Option<&'static str> {
        match self {
            Self::BankTransfer => Some("vietqr"),
            Self::Momo => Some("momo"),
            Self::Vnpay => Some("vnpay"),
            Self::Cod => None,
        }
    }
}

/// Status of a single payment attempt
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub order_id: i32,
    pub payment_method: String,
    #[sea_orm(nullable)]
    pub payment_provider: Option<String>,
    #[sea_orm(unique)]
    pub transaction_id: String,
    /// Amount in VND
    pub amount: i64,
    pub status: String,
    /// Provider request/response data plus any verified callback, as JSON
    #[sea_orm(column_type = "Text", nullable)]
    pub payment_data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn status(&self) -> Result<PaymentStatus, strum::ParseError> {
        self.status.parse()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
