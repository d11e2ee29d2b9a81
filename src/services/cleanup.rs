//! Expiration/Cleanup sweeps
//!
//! Three separable sweeps over stale requests. Their contracts do not
//! overlap: the purge sweep owns `approved` requests whose pickup date
//! passed (restores reserved stock, then deletes), the pickup-missed sweep
//! owns `pending` ones (marks them `expired_no_pickup`; pending requests
//! never reserved stock), and the stale sweep deletes anything past the
//! retention window. Each sweep tolerates per-item failures: it logs and
//! moves on to the next request.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::loan_request::{self, Entity as LoanRequestEntity, RequestStatus};
use crate::entities::request_line::{self, Entity as RequestLineEntity};
use crate::entities::stock_movement::MovementType;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::requests::{delete_request_cascade, to_stock_lines};
use crate::services::stock_ledger;

/// Actor recorded on stock movements produced by sweeps.
const SYSTEM_ACTOR: Uuid = Uuid::nil();

/// Result of one sweep run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    /// Requests that matched the sweep's criteria.
    pub examined: u64,
    /// Requests actually marked/purged/deleted.
    pub affected: u64,
    /// Requests skipped because their individual handling failed.
    pub failed: u64,
    /// Timestamp the sweep ran against.
    pub swept_at: DateTime<Utc>,
}

impl SweepReport {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            examined: 0,
            affected: 0,
            failed: 0,
            swept_at: now,
        }
    }
}

#[derive(Clone)]
pub struct CleanupService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    retention: Duration,
    expired_grace: Duration,
}

impl CleanupService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        retention_days: i64,
        expired_grace_days: i64,
    ) -> Self {
        Self {
            db,
            event_sender,
            retention: Duration::days(retention_days),
            expired_grace: Duration::days(expired_grace_days),
        }
    }

    /// Marks pending requests whose pickup date has passed as
    /// `expired_no_pickup`. No stock is involved: pending requests never
    /// held a reservation.
    #[instrument(skip(self))]
    pub async fn mark_missed_pickups(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, ServiceError> {
        let candidates = LoanRequestEntity::find()
            .filter(loan_request::Column::Status.eq(RequestStatus::Pending.as_str()))
            .filter(loan_request::Column::PickupDate.lt(now))
            .all(&*self.db)
            .await?;

        let mut report = SweepReport::new(now);
        report.examined = candidates.len() as u64;

        for request in candidates {
            // Conditional on the status still being pending: a request
            // approved since the read above belongs to the purge sweep.
            let update = LoanRequestEntity::update_many()
                .col_expr(
                    loan_request::Column::Status,
                    Expr::value(RequestStatus::ExpiredNoPickup.as_str()),
                )
                .filter(loan_request::Column::Id.eq(request.id))
                .filter(loan_request::Column::Status.eq(RequestStatus::Pending.as_str()))
                .exec(&*self.db)
                .await;

            match update {
                Ok(result) if result.rows_affected > 0 => {
                    report.affected += 1;
                    info!(request_id = %request.id, "Marked request expired_no_pickup");
                    self.emit(Event::RequestExpired {
                        request_id: request.id,
                        requester_id: request.requester_id,
                    })
                    .await;
                }
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(request_id = %request.id, error = %e, "Failed to mark request expired");
                }
            }
        }

        counter!("labtrack_cleanup.pickup_missed", report.affected);
        Ok(report)
    }

    /// Purges approved requests whose pickup date has passed: restores the
    /// reserved stock, then deletes the request and its lines. Restore and
    /// delete commit together per request.
    #[instrument(skip(self))]
    pub async fn purge_expired_approved(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, ServiceError> {
        let candidates = LoanRequestEntity::find()
            .filter(loan_request::Column::Status.eq(RequestStatus::Approved.as_str()))
            .filter(loan_request::Column::PickupDate.lt(now))
            .all(&*self.db)
            .await?;

        let mut report = SweepReport::new(now);
        report.examined = candidates.len() as u64;

        for request in candidates {
            match self.purge_one(&request).await {
                Ok(()) => {
                    report.affected += 1;
                    info!(request_id = %request.id, "Purged expired approved request, stock restored");
                    self.emit(Event::RequestExpired {
                        request_id: request.id,
                        requester_id: request.requester_id,
                    })
                    .await;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(request_id = %request.id, error = %e, "Failed to purge expired request");
                }
            }
        }

        counter!("labtrack_cleanup.purged", report.affected);
        Ok(report)
    }

    async fn purge_one(&self, request: &loan_request::Model) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let lines = RequestLineEntity::find()
            .filter(request_line::Column::RequestId.eq(request.id))
            .all(&txn)
            .await?;
        let stock_lines = to_stock_lines(&lines)?;

        stock_ledger::restore_in(&txn, &stock_lines, SYSTEM_ACTOR, MovementType::Restoration)
            .await?;
        delete_request_cascade(&txn, request).await?;

        txn.commit().await?;
        Ok(())
    }

    /// Deletes requests past the retention window (by creation date) and
    /// `expired_no_pickup` requests past the shorter grace window,
    /// regardless of stock state.
    #[instrument(skip(self))]
    pub async fn purge_stale(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let retention_cutoff = now - self.retention;
        let grace_cutoff = now - self.expired_grace;

        let candidates = LoanRequestEntity::find()
            .filter(
                Condition::any()
                    .add(loan_request::Column::CreatedAt.lt(retention_cutoff))
                    .add(
                        Condition::all()
                            .add(
                                loan_request::Column::Status
                                    .eq(RequestStatus::ExpiredNoPickup.as_str()),
                            )
                            .add(loan_request::Column::PickupDate.lt(grace_cutoff)),
                    ),
            )
            .all(&*self.db)
            .await?;

        let mut report = SweepReport::new(now);
        report.examined = candidates.len() as u64;

        for request in candidates {
            let txn = match self.db.begin().await {
                Ok(txn) => txn,
                Err(e) => {
                    report.failed += 1;
                    warn!(request_id = %request.id, error = %e, "Failed to open purge transaction");
                    continue;
                }
            };
            match delete_request_cascade(&txn, &request).await {
                Ok(()) => match txn.commit().await {
                    Ok(()) => {
                        report.affected += 1;
                        info!(request_id = %request.id, "Deleted stale request");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(request_id = %request.id, error = %e, "Failed to commit stale purge");
                    }
                },
                Err(e) => {
                    report.failed += 1;
                    warn!(request_id = %request.id, error = %e, "Failed to delete stale request");
                }
            }
        }

        counter!("labtrack_cleanup.stale_deleted", report.affected);
        Ok(report)
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to enqueue domain event");
        }
    }
}
