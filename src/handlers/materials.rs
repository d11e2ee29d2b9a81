use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::AuthenticatedUser;
use crate::entities::{MaterialCategory, MaterialRef};
use crate::errors::{ErrorResponse, ServiceError};
use crate::services::stock_ledger::StockLevel;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CategoryQuery {
    pub category: MaterialCategory,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdjustPayload {
    pub category: MaterialCategory,
    pub new_quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkAdjustPayload {
    pub adjustments: Vec<BulkAdjustItem>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkAdjustItem {
    pub material_id: i64,
    pub category: MaterialCategory,
    pub delta: i32,
}

#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct LowStockQuery {
    pub threshold: Option<i32>,
}

pub async fn get_stock(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<i64>,
    Query(query): Query<CategoryQuery>,
) -> ApiResult<StockLevel> {
    let level = state
        .services
        .ledger
        .get_stock(MaterialRef::new(query.category, id))
        .await?;
    Ok(Json(ApiResponse::success(level)))
}

/// Sets a material's stock to an absolute value.
pub async fn adjust_stock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(payload): Json<AdjustPayload>,
) -> ApiResult<StockLevel> {
    if !user.role.can_adjust_stock() {
        return Err(ServiceError::Forbidden(
            "role may not adjust stock".to_string(),
        ));
    }
    let level = state
        .services
        .ledger
        .set_absolute(
            MaterialRef::new(payload.category, id),
            payload.new_quantity,
            user.user_id,
        )
        .await?;
    Ok(Json(ApiResponse::success(level)))
}

/// Applies relative deltas item by item. Responds 400 with per-item
/// outcomes when any item was rejected; already-applied items stay applied.
pub async fn bulk_adjust_stock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<BulkAdjustPayload>,
) -> Result<Response, ServiceError> {
    if !user.role.can_adjust_stock() {
        return Err(ServiceError::Forbidden(
            "role may not adjust stock".to_string(),
        ));
    }
    if payload.adjustments.is_empty() {
        return Err(ServiceError::ValidationError(
            "no adjustments given".to_string(),
        ));
    }

    let adjustments: Vec<(MaterialRef, i32)> = payload
        .adjustments
        .iter()
        .map(|a| (MaterialRef::new(a.category, a.material_id), a.delta))
        .collect();

    let outcomes = state
        .services
        .ledger
        .bulk_adjust_relative(&adjustments, user.user_id)
        .await?;

    if outcomes.iter().all(|o| o.applied) {
        return Ok(Json(ApiResponse::success(outcomes)).into_response());
    }

    let body = ErrorResponse {
        error: "Bad Request".to_string(),
        message: "one or more adjustments were rejected".to_string(),
        details: Some(json!(outcomes)),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    Ok((StatusCode::BAD_REQUEST, Json(body)).into_response())
}

pub async fn list_low_stock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<LowStockQuery>,
) -> ApiResult<Vec<StockLevel>> {
    if !user.role.is_staff() {
        return Err(ServiceError::Forbidden(
            "role may not inspect stock levels".to_string(),
        ));
    }
    let threshold = query.threshold.unwrap_or(10);
    let levels = state.services.ledger.list_low_stock(threshold).await?;
    Ok(Json(ApiResponse::success(levels)))
}
