//! Student borrow endpoints, driven by librarians on a student's behalf

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    error::{AppResult, ErrorResponse},
    models::{BorrowEntry, BorrowSummary},
    AppState,
};

/// Batch of books to borrow, return or extend
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct BookBatchRequest {
    /// Book identifiers
    #[serde(default)]
    pub book_uuids: Option<Vec<String>>,
}

/// Result of a committed batch
#[derive(Debug, Serialize, ToSchema)]
pub struct BorrowResponse {
    /// Number of loans created or updated
    pub count: usize,
    pub student_name: String,
    pub message: String,
}

impl From<BorrowSummary> for BorrowResponse {
    fn from(summary: BorrowSummary) -> Self {
        Self {
            message: summary.message(),
            count: summary.count,
            student_name: summary.student_name,
        }
    }
}

/// A student's open loans
#[utoipa::path(
    get,
    path = "/student-borrow/{username}",
    tag = "borrows",
    params(
        ("username" = String, Path, description = "Student username")
    ),
    responses(
        (status = 200, description = "Open loans, oldest first", body = Vec<BorrowEntry>),
        (status = 404, description = "Student not found", body = ErrorResponse)
    )
)]
pub async fn list_student_borrows(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> AppResult<Json<Vec<BorrowEntry>>> {
    let loans = state.services.catalog.student_loans(&username).await?;
    Ok(Json(loans))
}

/// Every loan a student ever had
#[utoipa::path(
    get,
    path = "/student-borrow/{username}/history",
    tag = "borrows",
    params(
        ("username" = String, Path, description = "Student username")
    ),
    responses(
        (status = 200, description = "All loans, oldest first", body = Vec<BorrowEntry>),
        (status = 404, description = "Student not found", body = ErrorResponse)
    )
)]
pub async fn list_student_borrow_history(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> AppResult<Json<Vec<BorrowEntry>>> {
    let history = state.services.catalog.student_history(&username).await?;
    Ok(Json(history))
}

/// Lend books to a student
#[utoipa::path(
    post,
    path = "/student-borrow/{username}",
    tag = "borrows",
    params(
        ("username" = String, Path, description = "Student username")
    ),
    request_body = BookBatchRequest,
    responses(
        (status = 201, description = "Books borrowed", body = BorrowResponse),
        (status = 400, description = "Batch rejected", body = ErrorResponse),
        (status = 404, description = "Student not found", body = ErrorResponse)
    )
)]
pub async fn borrow_books(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(request): Json<BookBatchRequest>,
) -> AppResult<(StatusCode, Json<BorrowResponse>)> {
    let summary = state
        .services
        .borrows
        .borrow_books(&username, request.book_uuids.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(summary.into())))
}

/// Take books back from a student
#[utoipa::path(
    patch,
    path = "/student-borrow/{username}/return",
    tag = "borrows",
    params(
        ("username" = String, Path, description = "Student username")
    ),
    request_body = BookBatchRequest,
    responses(
        (status = 200, description = "Books returned", body = BorrowResponse),
        (status = 400, description = "Batch rejected", body = ErrorResponse),
        (status = 404, description = "Student not found", body = ErrorResponse)
    )
)]
pub async fn return_books(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(request): Json<BookBatchRequest>,
) -> AppResult<Json<BorrowResponse>> {
    let summary = state
        .services
        .borrows
        .return_books(&username, request.book_uuids.as_deref())
        .await?;
    Ok(Json(summary.into()))
}

/// Extend a student's loans
#[utoipa::path(
    patch,
    path = "/student-borrow/{username}/extend",
    tag = "borrows",
    params(
        ("username" = String, Path, description = "Student username")
    ),
    request_body = BookBatchRequest,
    responses(
        (status = 200, description = "Loans extended", body = BorrowResponse),
        (status = 400, description = "Batch rejected", body = ErrorResponse),
        (status = 404, description = "Student not found", body = ErrorResponse)
    )
)]
pub async fn extend_books(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(request): Json<BookBatchRequest>,
) -> AppResult<Json<BorrowResponse>> {
    let summary = state
        .services
        .borrows
        .extend_books(&username, request.book_uuids.as_deref())
        .await?;
    Ok(Json(summary.into()))
}
