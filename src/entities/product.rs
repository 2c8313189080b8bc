use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::services::variants::ProductKind;

/// Catalog product.
///
/// `stock` is the product's own counter while it has no variant rows. Once variants exist it
/// holds the sum of their stock and is only touched by the inventory ledger.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    /// Base price in VND
    pub price: i64,
    pub stock: i32,
    pub product_type: String,
    /// Serialized variant definition (colors/storages or configs)
    #[sea_orm(column_type = "Text", nullable)]
    pub variants: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product_variant::Entity")]
    Variants,
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variants.def()
    }
}

impl Model {
    /// Category used to read option selections; unrecognized tags fall back to `plain`.
    pub fn kind(&self) -> ProductKind {
        self.product_type.trim().parse().unwrap_or(ProductKind::Plain)
    }
}

impl ActiveModelBehavior for ActiveModel {}
