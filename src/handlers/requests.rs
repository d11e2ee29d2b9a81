use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthenticatedUser;
use crate::entities::loan_request::{self, RequestStatus};
use crate::entities::{MaterialCategory, MaterialRef};
use crate::errors::ServiceError;
use crate::services::requests::{DeliveredLine, NewRequestLine};
use crate::{ApiResponse, ApiResult, AppState, PaginatedResponse};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRequestPayload {
    #[validate(length(min = 1, message = "at least one line is required"))]
    pub lines: Vec<RequestLinePayload>,
    pub pickup_date: DateTime<Utc>,
    pub return_due_date: DateTime<Utc>,
    pub approver_id: Option<Uuid>,
}

// Serialize is required by the length validator on CreateRequestPayload,
// which embeds the offending value in its error params.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RequestLinePayload {
    pub material_id: i64,
    pub category: MaterialCategory,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeliverPayload {
    /// Lines actually handed over. May be empty: the request still
    /// transitions to delivered, with no debts.
    #[serde(default)]
    pub lines: Vec<DeliveredLinePayload>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeliveredLinePayload {
    pub line_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReturnPayload {
    pub lines: Vec<DeliveredLinePayload>,
}

#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct RequestListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<String>,
    pub requester_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RequestSummary {
    pub id: Uuid,
    pub folio: String,
    pub requester_id: Uuid,
    pub approver_id: Option<Uuid>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub pickup_date: DateTime<Utc>,
    pub return_due_date: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl From<loan_request::Model> for RequestSummary {
    fn from(model: loan_request::Model) -> Self {
        Self {
            id: model.id,
            folio: model.folio,
            requester_id: model.requester_id,
            approver_id: model.approver_id,
            status: model.status,
            created_at: model.created_at,
            pickup_date: model.pickup_date,
            return_due_date: model.return_due_date,
            delivered_at: model.delivered_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RequestDetailResponse {
    #[serde(flatten)]
    pub summary: RequestSummary,
    pub lines: Vec<LineSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LineSummary {
    pub id: Uuid,
    pub material_id: i64,
    pub category: String,
    pub requested_quantity: i32,
    pub delivered_quantity: Option<i32>,
}

pub async fn create_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateRequestPayload>,
) -> ApiResult<RequestDetailResponse> {
    if !user.role.can_create_request() {
        return Err(ServiceError::Forbidden(
            "role may not submit loan requests".to_string(),
        ));
    }
    payload
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    let lines: Vec<NewRequestLine> = payload
        .lines
        .iter()
        .map(|l| NewRequestLine {
            material: MaterialRef::new(l.category, l.material_id),
            quantity: l.quantity,
        })
        .collect();

    let detail = state
        .services
        .requests
        .create(
            user,
            &lines,
            payload.pickup_date,
            payload.return_due_date,
            payload.approver_id,
        )
        .await?;

    Ok(Json(ApiResponse::success(to_detail_response(detail))))
}

pub async fn approve_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<RequestSummary> {
    if !user.role.can_approve() {
        return Err(ServiceError::Forbidden(
            "role may not approve requests".to_string(),
        ));
    }
    let updated = state.services.requests.approve(id, user.user_id).await?;
    Ok(Json(ApiResponse::success(RequestSummary::from(updated))))
}

pub async fn reject_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    if !user.role.can_approve() {
        return Err(ServiceError::Forbidden(
            "role may not reject requests".to_string(),
        ));
    }
    state.services.requests.reject(id).await?;
    Ok(Json(ApiResponse::success(json!({
        "request_id": id,
        "status": "rejected"
    }))))
}

pub async fn cancel_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    state.services.requests.cancel(id, user).await?;
    Ok(Json(ApiResponse::success(json!({
        "request_id": id,
        "status": "cancelled"
    }))))
}

pub async fn deliver_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<DeliverPayload>,
) -> ApiResult<serde_json::Value> {
    if !user.role.can_deliver() {
        return Err(ServiceError::Forbidden(
            "role may not deliver materials".to_string(),
        ));
    }
    let delivered: Vec<DeliveredLine> = payload
        .lines
        .iter()
        .map(|l| DeliveredLine {
            line_id: l.line_id,
            quantity: l.quantity,
        })
        .collect();
    let debt_count = state.services.requests.deliver(id, &delivered, user).await?;
    Ok(Json(ApiResponse::success(json!({
        "request_id": id,
        "status": "delivered",
        "debts_opened": debt_count
    }))))
}

pub async fn return_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReturnPayload>,
) -> ApiResult<crate::services::debts::ReturnOutcome> {
    if !user.role.can_deliver() {
        return Err(ServiceError::Forbidden(
            "role may not receive returns".to_string(),
        ));
    }
    let returns: Vec<crate::services::debts::ReturnLine> = payload
        .lines
        .iter()
        .map(|l| crate::services::debts::ReturnLine {
            line_id: l.line_id,
            quantity: l.quantity,
        })
        .collect();
    let outcome = state.services.debts.resolve_partial(id, &returns).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn get_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<RequestDetailResponse> {
    let detail = state.services.requests.get_request(id).await?;
    if !user.role.is_staff() && detail.request.requester_id != user.user_id {
        return Err(ServiceError::Forbidden(
            "request belongs to another user".to_string(),
        ));
    }
    Ok(Json(ApiResponse::success(to_detail_response(detail))))
}

pub async fn list_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<RequestListQuery>,
) -> ApiResult<PaginatedResponse<RequestSummary>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let status = match query.status.as_deref() {
        Some(s) => Some(RequestStatus::from_str(s).ok_or_else(|| {
            ServiceError::ValidationError(format!("unknown status '{}'", s))
        })?),
        None => None,
    };

    // Non-staff callers only ever see their own requests.
    let requester_filter = if user.role.is_staff() {
        query.requester_id
    } else {
        Some(user.user_id)
    };

    let (records, total) = state
        .services
        .requests
        .list_requests(page, limit, status, requester_filter)
        .await?;

    let items: Vec<RequestSummary> = records.into_iter().map(RequestSummary::from).collect();
    let total_pages = (total + limit - 1) / limit;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages,
    })))
}

fn to_detail_response(detail: crate::services::requests::RequestDetail) -> RequestDetailResponse {
    RequestDetailResponse {
        summary: RequestSummary::from(detail.request),
        lines: detail
            .lines
            .into_iter()
            .map(|l| LineSummary {
                id: l.id,
                material_id: l.material_id,
                category: l.category,
                requested_quantity: l.requested_quantity,
                delivered_quantity: l.delivered_quantity,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(lines: Vec<RequestLinePayload>) -> CreateRequestPayload {
        CreateRequestPayload {
            lines,
            pickup_date: Utc::now() + chrono::Duration::days(1),
            return_due_date: Utc::now() + chrono::Duration::days(7),
            approver_id: None,
        }
    }

    #[test]
    fn create_payload_requires_at_least_one_line() {
        // Exercises the length validator, which serializes the lines into
        // its error params.
        assert!(payload(vec![]).validate().is_err());
        assert!(payload(vec![RequestLinePayload {
            material_id: 1,
            category: MaterialCategory::Liquid,
            quantity: 2,
        }])
        .validate()
        .is_ok());
    }
}
