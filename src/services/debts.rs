//! Debt Tracker
//!
//! Per-item pending-return bookkeeping. Debts are opened at delivery time,
//! shrink as materials come back, and disappear at zero; once the last debt
//! of a request closes, the request itself is cascade-deleted.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::debt_entry::{self, Entity as DebtEntryEntity};
use crate::entities::loan_request::RequestStatus;
use crate::entities::{MaterialCategory, MaterialRef};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::requests::{delete_request_cascade, find_request};
use crate::services::stock_ledger;

/// Returned quantity for one request line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReturnLine {
    pub line_id: Uuid,
    pub quantity: i32,
}

/// Open debt joined with its material name, for display.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct DebtSummary {
    pub id: Uuid,
    pub request_id: Uuid,
    pub requester_id: Uuid,
    pub material_id: i64,
    pub category: MaterialCategory,
    pub material_name: String,
    pub pending_quantity: i32,
    pub due_date: DateTime<Utc>,
}

/// Outcome of a partial return.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ReturnOutcome {
    pub request_id: Uuid,
    /// True when the last debt closed and the request was removed.
    pub request_closed: bool,
    pub open_debts: u64,
}

#[derive(Clone)]
pub struct DebtService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl DebtService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Applies returned quantities to the request's open debts.
    ///
    /// Rejects any return that exceeds the current pending quantity. When
    /// every debt of the request reaches zero, the request, its lines and
    /// the (now empty) debt set are deleted in the same transaction.
    /// Calling this again for the deleted request yields `NotFound`.
    #[instrument(skip(self, returns))]
    pub async fn resolve_partial(
        &self,
        request_id: Uuid,
        returns: &[ReturnLine],
    ) -> Result<ReturnOutcome, ServiceError> {
        if returns.is_empty() {
            return Err(ServiceError::ValidationError(
                "no returned lines given".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let request = find_request(&txn, request_id).await?;
        if RequestStatus::from_str(&request.status) != Some(RequestStatus::Delivered) {
            return Err(ServiceError::Conflict(format!(
                "request {} is '{}', returns only apply to delivered requests",
                request_id, request.status
            )));
        }

        for ret in returns {
            if ret.quantity <= 0 {
                return Err(ServiceError::ValidationError(
                    "returned quantity must be positive".to_string(),
                ));
            }

            let debt = DebtEntryEntity::find()
                .filter(debt_entry::Column::RequestId.eq(request_id))
                .filter(debt_entry::Column::RequestLineId.eq(ret.line_id))
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("no open debt for line {}", ret.line_id))
                })?;

            if ret.quantity > debt.pending_quantity {
                return Err(ServiceError::ValidationError(format!(
                    "cannot return {}: only {} pending for line {}",
                    ret.quantity, debt.pending_quantity, ret.line_id
                )));
            }

            let remaining = debt.pending_quantity - ret.quantity;
            if remaining == 0 {
                debt.delete(&txn).await?;
            } else {
                let mut active: debt_entry::ActiveModel = debt.into();
                active.pending_quantity = Set(remaining);
                active.update(&txn).await?;
            }
        }

        let open_debts = DebtEntryEntity::find()
            .filter(debt_entry::Column::RequestId.eq(request_id))
            .count(&txn)
            .await?;

        let requester_id = request.requester_id;
        let request_closed = open_debts == 0;
        if request_closed {
            delete_request_cascade(&txn, &request).await?;
        }

        txn.commit().await?;

        info!(request_id = %request_id, open_debts, request_closed, "Returns applied");
        if request_closed {
            if let Err(e) = self
                .event_sender
                .send(Event::DebtSettled {
                    request_id,
                    requester_id,
                })
                .await
            {
                warn!(error = %e, "failed to enqueue domain event");
            }
        }

        Ok(ReturnOutcome {
            request_id,
            request_closed,
            open_debts,
        })
    }

    /// Open debts, optionally scoped to one requester, joined with material
    /// names through the category lookup.
    #[instrument(skip(self))]
    pub async fn list_open_debts(
        &self,
        requester_id: Option<Uuid>,
    ) -> Result<Vec<DebtSummary>, ServiceError> {
        let mut query = DebtEntryEntity::find();
        if let Some(requester_id) = requester_id {
            query = query.filter(debt_entry::Column::RequesterId.eq(requester_id));
        }
        let debts = query
            .order_by_asc(debt_entry::Column::DueDate)
            .all(&*self.db)
            .await?;

        let mut summaries = Vec::with_capacity(debts.len());
        for debt in debts {
            let category = MaterialCategory::from_str(&debt.category).ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "debt {} carries unknown category '{}'",
                    debt.id, debt.category
                ))
            })?;
            let material = MaterialRef::new(category, debt.material_id);
            let material_name = stock_ledger::read_stock(&*self.db, material)
                .await?
                .map(|level| level.name)
                .unwrap_or_else(|| format!("material {}", debt.material_id));

            summaries.push(DebtSummary {
                id: debt.id,
                request_id: debt.request_id,
                requester_id: debt.requester_id,
                material_id: debt.material_id,
                category,
                material_name,
                pending_quantity: debt.pending_quantity,
                due_date: debt.due_date,
            });
        }

        Ok(summaries)
    }
}
