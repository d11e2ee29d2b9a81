use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only ledger row. Every stock-affecting operation writes one of
/// these; a material's on-hand quantity must equal its initial stock plus
/// the signed sum of its movement deltas.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub material_id: i64,
    pub category: String,
    pub delta: i32,
    pub movement_type: String,
    pub actor_id: Uuid,
    pub occurred_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementType {
    /// Stock decrement at approval time.
    Reservation,
    /// Stock added back when an approved-but-undelivered request expires.
    Restoration,
    /// Stock added back for lines dropped at delivery time.
    Release,
    /// Manual absolute or relative correction by a storekeeper.
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Reservation => "reservation",
            MovementType::Restoration => "restoration",
            MovementType::Release => "release",
            MovementType::Adjustment => "adjustment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reservation" => Some(MovementType::Reservation),
            "restoration" => Some(MovementType::Restoration),
            "release" => Some(MovementType::Release),
            "adjustment" => Some(MovementType::Adjustment),
            _ => None,
        }
    }
}
