//! API handlers for the school library REST endpoints
//!
//! Identity is taken from the path; authentication and role checks belong to
//! whatever fronts this service.

pub mod books;
pub mod borrows;
pub mod health;
pub mod openapi;

use axum::{
    routing::{delete, get, patch},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::AppState;

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Books
        .route("/books", get(books::list_books).post(books::create_book))
        .route("/books/:uuid", delete(books::delete_book))
        // Student borrows
        .route(
            "/student-borrow/:username",
            get(borrows::list_student_borrows).post(borrows::borrow_books),
        )
        .route(
            "/student-borrow/:username/history",
            get(borrows::list_student_borrow_history),
        )
        .route("/student-borrow/:username/return", patch(borrows::return_books))
        .route("/student-borrow/:username/extend", patch(borrows::extend_books))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_v1)
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
