//! Liveness and readiness endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{config::BorrowConfig, AppState};

/// Borrowing rules in force, for clients that display them
#[derive(Serialize, ToSchema)]
pub struct BorrowRules {
    pub min_books: usize,
    pub max_books: usize,
    pub deadline_days: i64,
    pub extend_max_count: i32,
}

impl From<&BorrowConfig> for BorrowRules {
    fn from(config: &BorrowConfig) -> Self {
        Self {
            min_books: config.min_books,
            max_books: config.max_books,
            deadline_days: config.deadline_days,
            extend_max_count: config.extend_max_count,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub borrow: BorrowRules,
}

#[derive(Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub status: String,
    /// Storage error when not ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Process is up
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        borrow: BorrowRules::from(&state.config.borrow),
    })
}

/// Storage answers
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Storage reachable", body = ReadinessResponse),
        (status = 503, description = "Storage unreachable", body = ReadinessResponse)
    )
)]
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    match state.services.catalog.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".to_string(),
                detail: None,
            }),
        ),
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "unavailable".to_string(),
                    detail: Some(e.to_string()),
                }),
            )
        }
    }
}
