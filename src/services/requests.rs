//! Request Lifecycle Manager
//!
//! State machine for a loan request:
//! `pending → approved → delivered → closed` (closure deletes the request
//! once every debt reaches zero), with edges `pending → rejected`,
//! `pending|approved → cancelled` and `approved → expired_no_pickup`
//! (driven by the cleanup sweeps). Every transition that touches more than
//! one table runs in a single transaction.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::entities::loan_request::{self, Entity as LoanRequestEntity, RequestStatus};
use crate::entities::request_line::{self, Entity as RequestLineEntity};
use crate::entities::stock_movement::MovementType;
use crate::entities::{debt_entry, MaterialRef};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_ledger::{self, StockLine};

/// One requested material line at creation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewRequestLine {
    pub material: MaterialRef,
    pub quantity: i32,
}

/// Actually-delivered quantity for one request line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeliveredLine {
    pub line_id: Uuid,
    pub quantity: i32,
}

/// Request plus its lines, for detail reads.
#[derive(Debug, Clone, Serialize)]
pub struct RequestDetail {
    pub request: loan_request::Model,
    pub lines: Vec<request_line::Model>,
}

#[derive(Clone)]
pub struct RequestService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    pickup_grace: Duration,
}

impl RequestService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        pickup_grace_hours: i64,
    ) -> Self {
        Self {
            db,
            event_sender,
            pickup_grace: Duration::hours(pickup_grace_hours),
        }
    }

    /// Creates a request in `pending`, or directly in `approved` (with
    /// immediate reservation, same transaction) when the requester's role
    /// is auto-approved.
    #[instrument(skip(self, lines))]
    pub async fn create(
        &self,
        requester: AuthenticatedUser,
        lines: &[NewRequestLine],
        pickup_date: DateTime<Utc>,
        return_due_date: DateTime<Utc>,
        approver_id: Option<Uuid>,
    ) -> Result<RequestDetail, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "a request needs at least one material line".to_string(),
            ));
        }
        for line in lines {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "requested quantity must be positive (material {})",
                    line.material.id
                )));
            }
        }

        let now = Utc::now();
        if pickup_date < now - self.pickup_grace {
            return Err(ServiceError::ValidationError(
                "pickup date lies in the past".to_string(),
            ));
        }
        if return_due_date < pickup_date {
            return Err(ServiceError::ValidationError(
                "return date cannot precede pickup date".to_string(),
            ));
        }

        // Every line must reference an existing material.
        for line in lines {
            if stock_ledger::read_stock(&*self.db, line.material)
                .await?
                .is_none()
            {
                return Err(ServiceError::NotFound(format!(
                    "material {} not found in category '{}'",
                    line.material.id, line.material.category
                )));
            }
        }

        let auto_approved = requester.role.is_auto_approved();
        let status = if auto_approved {
            RequestStatus::Approved
        } else {
            RequestStatus::Pending
        };

        let request_id = Uuid::new_v4();
        let folio = generate_folio();

        let txn = self.db.begin().await?;

        let request = loan_request::ActiveModel {
            id: Set(request_id),
            folio: Set(folio.clone()),
            requester_id: Set(requester.user_id),
            approver_id: Set(if auto_approved {
                Some(requester.user_id)
            } else {
                approver_id
            }),
            status: Set(status.as_str().to_string()),
            created_at: Set(now),
            pickup_date: Set(pickup_date),
            return_due_date: Set(return_due_date),
            delivered_at: Set(None),
        }
        .insert(&txn)
        .await?;

        let mut stored_lines = Vec::with_capacity(lines.len());
        for line in lines {
            let stored = request_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                request_id: Set(request_id),
                material_id: Set(line.material.id),
                category: Set(line.material.category.as_str().to_string()),
                requested_quantity: Set(line.quantity),
                delivered_quantity: Set(None),
            }
            .insert(&txn)
            .await?;
            stored_lines.push(stored);
        }

        if auto_approved {
            let stock_lines: Vec<StockLine> = lines
                .iter()
                .map(|l| StockLine {
                    material: l.material,
                    quantity: l.quantity,
                })
                .collect();
            stock_ledger::reserve_in(&txn, &stock_lines, requester.user_id).await?;
        }

        txn.commit().await?;

        info!(request_id = %request_id, folio = %folio, auto_approved, "Loan request created");
        self.emit(Event::RequestCreated {
            request_id,
            requester_id: requester.user_id,
            folio,
        })
        .await;

        Ok(RequestDetail {
            request,
            lines: stored_lines,
        })
    }

    /// Approves a pending request, reserving stock for every line
    /// atomically. On insufficient stock nothing changes and the error
    /// names the material that fell short.
    #[instrument(skip(self))]
    pub async fn approve(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
    ) -> Result<loan_request::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let request = find_request(&txn, request_id).await?;
        // Claim the transition first so a concurrent approve of the same
        // request cannot reserve the stock twice.
        claim_transition(
            &txn,
            request_id,
            &[RequestStatus::Pending],
            RequestStatus::Approved,
        )
        .await?;

        let lines = RequestLineEntity::find()
            .filter(request_line::Column::RequestId.eq(request_id))
            .all(&txn)
            .await?;
        let stock_lines = to_stock_lines(&lines)?;

        stock_ledger::reserve_in(&txn, &stock_lines, approver_id).await?;

        let requester_id = request.requester_id;
        let mut active: loan_request::ActiveModel = request.into();
        active.approver_id = Set(Some(approver_id));
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(request_id = %request_id, "Request approved, stock reserved");
        self.emit(Event::RequestApproved {
            request_id,
            requester_id,
            approver_id,
        })
        .await;

        Ok(updated)
    }

    /// Rejects a pending request. No stock was reserved yet, so this is a
    /// plain cascade delete.
    #[instrument(skip(self))]
    pub async fn reject(&self, request_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let request = find_request(&txn, request_id).await?;
        claim_transition(
            &txn,
            request_id,
            &[RequestStatus::Pending],
            RequestStatus::Rejected,
        )
        .await?;

        let requester_id = request.requester_id;
        delete_request_cascade(&txn, &request).await?;

        txn.commit().await?;

        info!(request_id = %request_id, "Request rejected and removed");
        self.emit(Event::RequestRejected {
            request_id,
            requester_id,
        })
        .await;

        Ok(())
    }

    /// Cancels a request.
    ///
    /// The requester may cancel their own pending request, which deletes
    /// it. Staff cancel on someone's behalf instead soft-marks the request
    /// `cancelled` and keeps it for audit. The asymmetry is deliberate.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        request_id: Uuid,
        actor: AuthenticatedUser,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let request = find_request(&txn, request_id).await?;
        let requester_id = request.requester_id;
        let by_requester = actor.user_id == requester_id;

        if by_requester {
            claim_transition(
                &txn,
                request_id,
                &[RequestStatus::Pending],
                RequestStatus::Cancelled,
            )
            .await?;
            delete_request_cascade(&txn, &request).await?;
        } else {
            if !actor.role.is_staff() {
                return Err(ServiceError::Forbidden(
                    "only the requester or staff may cancel a request".to_string(),
                ));
            }
            claim_transition(
                &txn,
                request_id,
                &[RequestStatus::Pending, RequestStatus::Approved],
                RequestStatus::Cancelled,
            )
            .await?;
        }

        txn.commit().await?;

        info!(request_id = %request_id, by_requester, "Request cancelled");
        self.emit(Event::RequestCancelled {
            request_id,
            requester_id,
            by_requester,
        })
        .await;

        Ok(())
    }

    /// Records what was actually handed over for an approved request.
    ///
    /// Each delivered line gets its `delivered_quantity` set and one debt
    /// entry with `pending_quantity = delivered_quantity`. Lines absent
    /// from the delivered set are deleted, and their reservation — plus the
    /// undelivered remainder of partially delivered lines — is released
    /// back to inventory. An empty delivery still transitions the request
    /// to `delivered` and creates no debts.
    #[instrument(skip(self, delivered))]
    pub async fn deliver(
        &self,
        request_id: Uuid,
        delivered: &[DeliveredLine],
        actor: AuthenticatedUser,
    ) -> Result<usize, ServiceError> {
        let txn = self.db.begin().await?;

        let request = find_request(&txn, request_id).await?;
        // Claimed up front: a second concurrent delivery must fail here
        // rather than open a duplicate set of debts.
        claim_transition(
            &txn,
            request_id,
            &[RequestStatus::Approved],
            RequestStatus::Delivered,
        )
        .await?;

        let lines = RequestLineEntity::find()
            .filter(request_line::Column::RequestId.eq(request_id))
            .all(&txn)
            .await?;

        let mut delivered_by_line: HashMap<Uuid, i32> = HashMap::with_capacity(delivered.len());
        for d in delivered {
            if d.quantity < 0 {
                return Err(ServiceError::ValidationError(
                    "delivered quantity cannot be negative".to_string(),
                ));
            }
            if !lines.iter().any(|l| l.id == d.line_id) {
                return Err(ServiceError::ValidationError(format!(
                    "line {} does not belong to request {}",
                    d.line_id, request_id
                )));
            }
            if delivered_by_line.insert(d.line_id, d.quantity).is_some() {
                return Err(ServiceError::ValidationError(format!(
                    "line {} listed more than once",
                    d.line_id
                )));
            }
        }

        let now = Utc::now();
        let mut released: Vec<StockLine> = Vec::new();
        let mut debt_count = 0usize;

        for line in &lines {
            let material = material_ref(line)?;
            let handed = delivered_by_line.get(&line.id).copied().unwrap_or(0);

            if handed > line.requested_quantity {
                return Err(ServiceError::ValidationError(format!(
                    "cannot deliver {} of line {}: only {} were requested",
                    handed, line.id, line.requested_quantity
                )));
            }

            if handed > 0 {
                let mut active: request_line::ActiveModel = line.clone().into();
                active.delivered_quantity = Set(Some(handed));
                active.update(&txn).await?;

                debt_entry::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    request_id: Set(request_id),
                    request_line_id: Set(line.id),
                    requester_id: Set(request.requester_id),
                    material_id: Set(line.material_id),
                    category: Set(line.category.clone()),
                    pending_quantity: Set(handed),
                    due_date: Set(request.return_due_date),
                    created_at: Set(now),
                }
                .insert(&txn)
                .await?;
                debt_count += 1;
            } else {
                // No-show line: drop it entirely.
                line.clone().delete(&txn).await?;
            }

            let remainder = line.requested_quantity - handed;
            if remainder > 0 {
                released.push(StockLine {
                    material,
                    quantity: remainder,
                });
            }
        }

        if !released.is_empty() {
            stock_ledger::restore_in(&txn, &released, actor.user_id, MovementType::Release)
                .await?;
        }

        let requester_id = request.requester_id;
        let mut active: loan_request::ActiveModel = request.into();
        active.delivered_at = Set(Some(now));
        active.update(&txn).await?;

        txn.commit().await?;

        info!(
            request_id = %request_id,
            debt_count,
            released = released.len(),
            "Request delivered"
        );
        self.emit(Event::RequestDelivered {
            request_id,
            requester_id,
            debt_count,
        })
        .await;

        Ok(debt_count)
    }

    /// Request with its lines.
    #[instrument(skip(self))]
    pub async fn get_request(&self, request_id: Uuid) -> Result<RequestDetail, ServiceError> {
        let request = find_request(&*self.db, request_id).await?;
        let lines = RequestLineEntity::find()
            .filter(request_line::Column::RequestId.eq(request_id))
            .all(&*self.db)
            .await?;
        Ok(RequestDetail { request, lines })
    }

    /// Paginated request listing, newest first, optionally filtered by
    /// status and requester.
    #[instrument(skip(self))]
    pub async fn list_requests(
        &self,
        page: u64,
        limit: u64,
        status: Option<RequestStatus>,
        requester_id: Option<Uuid>,
    ) -> Result<(Vec<loan_request::Model>, u64), ServiceError> {
        let mut query = LoanRequestEntity::find();
        if let Some(status) = status {
            query = query.filter(loan_request::Column::Status.eq(status.as_str()));
        }
        if let Some(requester_id) = requester_id {
            query = query.filter(loan_request::Column::RequesterId.eq(requester_id));
        }
        query = query.order_by_desc(loan_request::Column::CreatedAt);

        let paginator = query.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to enqueue domain event");
        }
    }
}

pub(crate) async fn find_request<C: sea_orm::ConnectionTrait>(
    conn: &C,
    request_id: Uuid,
) -> Result<loan_request::Model, ServiceError> {
    LoanRequestEntity::find_by_id(request_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("request {} not found", request_id)))
}

/// Deletes a request together with its lines and any debt entries.
pub(crate) async fn delete_request_cascade<C: sea_orm::ConnectionTrait>(
    conn: &C,
    request: &loan_request::Model,
) -> Result<(), ServiceError> {
    debt_entry::Entity::delete_many()
        .filter(debt_entry::Column::RequestId.eq(request.id))
        .exec(conn)
        .await?;
    RequestLineEntity::delete_many()
        .filter(request_line::Column::RequestId.eq(request.id))
        .exec(conn)
        .await?;
    LoanRequestEntity::delete_by_id(request.id).exec(conn).await?;
    Ok(())
}

pub(crate) fn material_ref(line: &request_line::Model) -> Result<MaterialRef, ServiceError> {
    let category = crate::entities::MaterialCategory::from_str(&line.category).ok_or_else(|| {
        ServiceError::InternalError(format!(
            "line {} carries unknown category '{}'",
            line.id, line.category
        ))
    })?;
    Ok(MaterialRef::new(category, line.material_id))
}

pub(crate) fn to_stock_lines(
    lines: &[request_line::Model],
) -> Result<Vec<StockLine>, ServiceError> {
    lines
        .iter()
        .map(|l| {
            Ok(StockLine {
                material: material_ref(l)?,
                quantity: l.requested_quantity,
            })
        })
        .collect()
}

/// Flips the status with a single conditional update, checked via
/// rows-affected. The row only moves if it is still in one of the `from`
/// states, so two concurrent transitions of the same request cannot both
/// succeed — the same discipline the ledger applies to stock rows.
async fn claim_transition<C: sea_orm::ConnectionTrait>(
    conn: &C,
    request_id: Uuid,
    from: &[RequestStatus],
    to: RequestStatus,
) -> Result<(), ServiceError> {
    let from_states: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let result = LoanRequestEntity::update_many()
        .col_expr(loan_request::Column::Status, Expr::value(to.as_str()))
        .filter(loan_request::Column::Id.eq(request_id))
        .filter(loan_request::Column::Status.is_in(from_states))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        // Lost the race or called out of order; report the current state.
        let fresh = find_request(conn, request_id).await?;
        return Err(wrong_status(&fresh));
    }
    Ok(())
}

fn wrong_status(request: &loan_request::Model) -> ServiceError {
    ServiceError::Conflict(format!(
        "request {} is '{}', transition not allowed",
        request.id, request.status
    ))
}

fn generate_folio() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("SOL-{}", id[..8].to_uppercase())
}
