//! labtrack-api library
//!
//! Core functionality for the laboratory material loan service: request
//! lifecycle, stock ledger, and debt reconciliation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod scheduler;
pub mod services;

use axum::{
    extract::{FromRef, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: services::AppServices,
    pub auth: auth::AuthConfig,
}

impl FromRef<AppState> for auth::AuthConfig {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Common response wrapper
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

/// Common query parameters for list endpoints
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        // Requests API
        .route("/requests", post(handlers::requests::create_request))
        .route("/requests", get(handlers::requests::list_requests))
        .route("/requests/:id", get(handlers::requests::get_request))
        .route(
            "/requests/:id/approve",
            put(handlers::requests::approve_request),
        )
        .route(
            "/requests/:id/reject",
            put(handlers::requests::reject_request),
        )
        .route(
            "/requests/:id/cancel",
            put(handlers::requests::cancel_request),
        )
        .route(
            "/requests/:id/deliver",
            put(handlers::requests::deliver_request),
        )
        .route(
            "/requests/:id/return",
            put(handlers::requests::return_request),
        )
        // Materials API
        .route(
            "/materials/low-stock",
            get(handlers::materials::list_low_stock),
        )
        .route("/materials/:id/stock", get(handlers::materials::get_stock))
        .route(
            "/materials/:id/adjust",
            post(handlers::materials::adjust_stock),
        )
        .route(
            "/materials/bulk-adjust",
            post(handlers::materials::bulk_adjust_stock),
        )
        // Debts API
        .route("/debts", get(handlers::debts::list_debts))
}

async fn api_status() -> ApiResult<Value> {
    let version = env!("CARGO_PKG_VERSION");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "service": "labtrack-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
