use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::services::debts::DebtSummary;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct DebtListQuery {
    /// Staff may scope to one requester; omitting it lists everything.
    pub requester_id: Option<Uuid>,
}

pub async fn list_debts(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<DebtListQuery>,
) -> ApiResult<Vec<DebtSummary>> {
    // Non-staff callers only ever see their own debts.
    let requester_filter = if user.role.is_staff() {
        query.requester_id
    } else {
        Some(user.user_id)
    };

    let debts = state.services.debts.list_open_debts(requester_filter).await?;
    Ok(Json(ApiResponse::success(debts)))
}
