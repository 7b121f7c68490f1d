//! Live server tests
//!
//! Expect a running server on localhost:8080 whose database holds a student
//! `eko` with no open loans and at least one book in stock.

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";
const STUDENT: &str = "eko";

/// First book that still has a copy on the shelf
async fn book_in_stock(client: &Client) -> Value {
    let response = client
        .get(format!("{}/books", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    let books: Value = response.json().await.expect("Failed to parse books");
    books
        .as_array()
        .expect("Books are not a list")
        .iter()
        .find(|b| b["quantity"].as_i64().unwrap_or(0) > 0)
        .cloned()
        .expect("No book in stock")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_borrow_extend_return_cycle() {
    let client = Client::new();
    let book = book_in_stock(&client).await;
    let batch = json!({ "book_uuids": [book["uuid"]] });

    let response = client
        .post(format!("{}/student-borrow/{}", BASE_URL, STUDENT))
        .json(&batch)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);

    // Same book again while the loan is open
    let response = client
        .post(format!("{}/student-borrow/{}", BASE_URL, STUDENT))
        .json(&batch)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 400);

    let response = client
        .patch(format!("{}/student-borrow/{}/extend", BASE_URL, STUDENT))
        .json(&batch)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let response = client
        .patch(format!("{}/student-borrow/{}/return", BASE_URL, STUDENT))
        .json(&batch)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["count"], 1);
}

#[tokio::test]
#[ignore]
async fn test_unknown_student() {
    let client = Client::new();

    let response = client
        .get(format!("{}/student-borrow/no-such-student", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 404);
}
