//! Stock Ledger
//!
//! Polymorphic read/adjust/log of quantities across the four material
//! categories. Every operation here is written once against the
//! `MaterialCategory` → {table, stock column} lookup; quantity decrements
//! are single conditional updates checked via rows-affected so concurrent
//! approvals can never jointly overdraw a material.

use metrics::counter;
use sea_orm::sea_query::{Alias, Expr, Query};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::stock_movement::{self, MovementType};
use crate::entities::{MaterialCategory, MaterialRef};
use crate::errors::ServiceError;

/// One material + quantity pair, as used by reserve/restore.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StockLine {
    pub material: MaterialRef,
    pub quantity: i32,
}

/// Read-only projection of a material's current stock.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StockLevel {
    pub material_id: i64,
    pub category: MaterialCategory,
    pub name: String,
    pub on_hand: i32,
    pub unit: String,
}

/// Result of one item within a bulk relative adjustment. Items are applied
/// independently; a rejected item never rolls back its neighbours.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AdjustmentOutcome {
    pub material_id: i64,
    pub category: MaterialCategory,
    pub delta: i32,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
}

impl StockLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Current stock for one material.
    #[instrument(skip(self))]
    pub async fn get_stock(&self, material: MaterialRef) -> Result<StockLevel, ServiceError> {
        read_stock(&*self.db, material)
            .await?
            .ok_or_else(|| material_not_found(material))
    }

    /// Reserves stock for every line, all-or-nothing.
    ///
    /// Availability is enforced per line by a conditional decrement inside
    /// one transaction; if any line cannot be satisfied the whole
    /// reservation rolls back and the error names the offending material.
    #[instrument(skip(self, lines))]
    pub async fn reserve(&self, lines: &[StockLine], actor_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        reserve_in(&txn, lines, actor_id).await?;
        txn.commit().await?;
        counter!("labtrack_ledger.reservations", lines.len() as u64);
        Ok(())
    }

    /// Adds reserved quantities back, e.g. when an approved request expires
    /// before pickup. Always succeeds for existing materials.
    #[instrument(skip(self, lines))]
    pub async fn restore(
        &self,
        lines: &[StockLine],
        actor_id: Uuid,
        movement_type: MovementType,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        restore_in(&txn, lines, actor_id, movement_type).await?;
        txn.commit().await?;
        counter!("labtrack_ledger.restorations", lines.len() as u64);
        Ok(())
    }

    /// Sets a material's stock to an absolute value, logging the signed
    /// difference as an adjustment movement.
    #[instrument(skip(self))]
    pub async fn set_absolute(
        &self,
        material: MaterialRef,
        new_quantity: i32,
        actor_id: Uuid,
    ) -> Result<StockLevel, ServiceError> {
        if new_quantity < 0 {
            return Err(ServiceError::ValidationError(
                "stock quantity cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let current = read_stock(&txn, material)
            .await?
            .ok_or_else(|| material_not_found(material))?;
        let delta = new_quantity - current.on_hand;

        // Optimistic write: only lands if nobody changed the row since the
        // read above.
        let stmt = Query::update()
            .table(Alias::new(material.category.table()))
            .value(Alias::new(material.category.stock_column()), new_quantity)
            .and_where(Expr::col(Alias::new("id")).eq(material.id))
            .and_where(
                Expr::col(Alias::new(material.category.stock_column())).eq(current.on_hand),
            )
            .to_owned();
        let backend = txn.get_database_backend();
        let result = txn.execute(backend.build(&stmt)).await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::Conflict(format!(
                "stock for material {} changed concurrently",
                material.id
            )));
        }

        if delta != 0 {
            log_movement(&txn, material, delta, MovementType::Adjustment, actor_id).await?;
        }

        txn.commit().await?;

        info!(
            material_id = material.id,
            category = %material.category,
            old = current.on_hand,
            new = new_quantity,
            "Stock set to absolute value"
        );

        Ok(StockLevel {
            on_hand: new_quantity,
            ..current
        })
    }

    /// Applies relative deltas item by item. An item whose result would be
    /// negative is rejected without touching the others; items already
    /// committed stay committed. Callers get one outcome per input item.
    #[instrument(skip(self, adjustments))]
    pub async fn bulk_adjust_relative(
        &self,
        adjustments: &[(MaterialRef, i32)],
        actor_id: Uuid,
    ) -> Result<Vec<AdjustmentOutcome>, ServiceError> {
        let mut outcomes = Vec::with_capacity(adjustments.len());

        for &(material, delta) in adjustments {
            let outcome = match self.adjust_one(material, delta, actor_id).await {
                Ok(()) => AdjustmentOutcome {
                    material_id: material.id,
                    category: material.category,
                    delta,
                    applied: true,
                    error: None,
                },
                Err(ServiceError::DatabaseError(e)) => return Err(ServiceError::DatabaseError(e)),
                Err(e) => AdjustmentOutcome {
                    material_id: material.id,
                    category: material.category,
                    delta,
                    applied: false,
                    error: Some(e.response_message()),
                },
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn adjust_one(
        &self,
        material: MaterialRef,
        delta: i32,
        actor_id: Uuid,
    ) -> Result<(), ServiceError> {
        // The guard below compares against the negated delta; i32::MIN has
        // no negation and would leave stock unguarded.
        let floor = delta.checked_neg().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "adjustment delta {} is out of range (material {})",
                delta, material.id
            ))
        })?;

        let txn = self.db.begin().await?;

        let col = Alias::new(material.category.stock_column());
        let stmt = Query::update()
            .table(Alias::new(material.category.table()))
            .value(
                col.clone(),
                Expr::col(col.clone()).add(delta),
            )
            .and_where(Expr::col(Alias::new("id")).eq(material.id))
            .and_where(Expr::col(col).gte(floor))
            .to_owned();
        let backend = txn.get_database_backend();
        let result = txn.execute(backend.build(&stmt)).await?;

        if result.rows_affected() == 0 {
            return match read_stock(&txn, material).await? {
                Some(level) => Err(ServiceError::ValidationError(format!(
                    "adjustment of {} would make stock of '{}' negative (on hand: {})",
                    delta, level.name, level.on_hand
                ))),
                None => Err(material_not_found(material)),
            };
        }

        log_movement(&txn, material, delta, MovementType::Adjustment, actor_id).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Materials at or below the given threshold, across all four
    /// categories. Feeds the external low-stock alerting job.
    #[instrument(skip(self))]
    pub async fn list_low_stock(&self, threshold: i32) -> Result<Vec<StockLevel>, ServiceError> {
        let mut levels = Vec::new();
        let backend = self.db.get_database_backend();

        for category in MaterialCategory::ALL {
            let stmt = Query::select()
                .column(Alias::new("id"))
                .column(Alias::new("name"))
                .column(Alias::new(category.stock_column()))
                .column(Alias::new("unit"))
                .from(Alias::new(category.table()))
                .and_where(Expr::col(Alias::new(category.stock_column())).lte(threshold))
                .to_owned();

            for row in self.db.query_all(backend.build(&stmt)).await? {
                levels.push(StockLevel {
                    material_id: row.try_get("", "id")?,
                    category,
                    name: row.try_get("", "name")?,
                    on_hand: row.try_get("", category.stock_column())?,
                    unit: row.try_get("", "unit")?,
                });
            }
        }

        Ok(levels)
    }

    /// Signed sum of all movement deltas for a material. With the initial
    /// stock this must reproduce the current on-hand quantity.
    pub async fn movement_total(&self, material: MaterialRef) -> Result<i64, ServiceError> {
        use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

        let movements = stock_movement::Entity::find()
            .filter(stock_movement::Column::MaterialId.eq(material.id))
            .filter(stock_movement::Column::Category.eq(material.category.as_str()))
            .all(&*self.db)
            .await?;

        Ok(movements.iter().map(|m| m.delta as i64).sum())
    }
}

/// Reserve inside an existing transaction. Used directly by the lifecycle
/// manager so approval's status change and the decrements commit together.
pub(crate) async fn reserve_in<C: ConnectionTrait>(
    conn: &C,
    lines: &[StockLine],
    actor_id: Uuid,
) -> Result<(), ServiceError> {
    for line in lines {
        if line.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "reservation quantity must be positive (material {})",
                line.material.id
            )));
        }

        let col = Alias::new(line.material.category.stock_column());
        let stmt = Query::update()
            .table(Alias::new(line.material.category.table()))
            .value(col.clone(), Expr::col(col.clone()).sub(line.quantity))
            .and_where(Expr::col(Alias::new("id")).eq(line.material.id))
            .and_where(Expr::col(col).gte(line.quantity))
            .to_owned();
        let backend = conn.get_database_backend();
        let result = conn.execute(backend.build(&stmt)).await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing material from a short one.
            return match read_stock(conn, line.material).await? {
                Some(level) => Err(ServiceError::InsufficientStock(level.name)),
                None => Err(material_not_found(line.material)),
            };
        }

        log_movement(
            conn,
            line.material,
            -line.quantity,
            MovementType::Reservation,
            actor_id,
        )
        .await?;
    }
    Ok(())
}

/// Restore inside an existing transaction.
pub(crate) async fn restore_in<C: ConnectionTrait>(
    conn: &C,
    lines: &[StockLine],
    actor_id: Uuid,
    movement_type: MovementType,
) -> Result<(), ServiceError> {
    for line in lines {
        if line.quantity <= 0 {
            continue;
        }

        let col = Alias::new(line.material.category.stock_column());
        let stmt = Query::update()
            .table(Alias::new(line.material.category.table()))
            .value(col.clone(), Expr::col(col).add(line.quantity))
            .and_where(Expr::col(Alias::new("id")).eq(line.material.id))
            .to_owned();
        let backend = conn.get_database_backend();
        let result = conn.execute(backend.build(&stmt)).await?;

        if result.rows_affected() == 0 {
            return Err(material_not_found(line.material));
        }

        log_movement(conn, line.material, line.quantity, movement_type, actor_id).await?;
    }
    Ok(())
}

pub(crate) async fn read_stock<C: ConnectionTrait>(
    conn: &C,
    material: MaterialRef,
) -> Result<Option<StockLevel>, ServiceError> {
    let stmt = Query::select()
        .column(Alias::new("name"))
        .column(Alias::new(material.category.stock_column()))
        .column(Alias::new("unit"))
        .from(Alias::new(material.category.table()))
        .and_where(Expr::col(Alias::new("id")).eq(material.id))
        .to_owned();
    let backend = conn.get_database_backend();

    let row = conn.query_one(backend.build(&stmt)).await?;
    match row {
        Some(row) => Ok(Some(StockLevel {
            material_id: material.id,
            category: material.category,
            name: row.try_get("", "name")?,
            on_hand: row.try_get("", material.category.stock_column())?,
            unit: row.try_get("", "unit")?,
        })),
        None => Ok(None),
    }
}

async fn log_movement<C: ConnectionTrait>(
    conn: &C,
    material: MaterialRef,
    delta: i32,
    movement_type: MovementType,
    actor_id: Uuid,
) -> Result<(), ServiceError> {
    stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        material_id: Set(material.id),
        category: Set(material.category.as_str().to_string()),
        delta: Set(delta),
        movement_type: Set(movement_type.as_str().to_string()),
        actor_id: Set(actor_id),
        occurred_at: Set(chrono::Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

fn material_not_found(material: MaterialRef) -> ServiceError {
    ServiceError::NotFound(format!(
        "material {} not found in category '{}'",
        material.id, material.category
    ))
}
