//! OpenAPI documentation

use axum::Json;
use utoipa::OpenApi;

use crate::api::{books, borrows, health};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "School Library API",
        version = "0.1.0",
        description = "Book inventory and student borrowing"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        health::health_check,
        health::readiness_check,
        books::list_books,
        books::create_book,
        books::delete_book,
        borrows::list_student_borrows,
        borrows::list_student_borrow_history,
        borrows::borrow_books,
        borrows::return_books,
        borrows::extend_books,
    ),
    components(
        schemas(
            crate::models::Book,
            crate::models::CreateBook,
            crate::models::BorrowEntry,
            borrows::BookBatchRequest,
            borrows::BorrowResponse,
            health::HealthResponse,
            health::BorrowRules,
            health::ReadinessResponse,
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "books", description = "Book catalog"),
        (name = "borrows", description = "Student borrowing")
    )
)]
pub struct ApiDoc;

/// Serve the OpenAPI document
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
