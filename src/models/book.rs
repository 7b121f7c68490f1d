//! Book model and identifier parsing

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Book inventory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    /// Storage key, never exposed
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    pub title: String,
    pub author: String,
    /// Copies currently on the shelf
    pub quantity: i32,
    /// Earliest deadline among open loans while no copy is available
    pub nearest_return_date: Option<NaiveDate>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Book {
    pub fn new(title: impl Into<String>, author: impl Into<String>, quantity: i32) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            title: title.into(),
            author: author.into(),
            quantity,
            nearest_return_date: None,
            deleted_at: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.quantity >= 1
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub title: String,
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub author: String,
    #[serde(default)]
    #[validate(range(min = 0, message = "Ensure this value is greater than or equal to 0."))]
    pub quantity: i32,
}

impl CreateBook {
    /// Surrounding whitespace removed from title and author
    pub fn trimmed(self) -> Self {
        Self {
            title: self.title.trim().to_string(),
            author: self.author.trim().to_string(),
            quantity: self.quantity,
        }
    }
}

/// Parse caller-supplied identifiers, keeping request order
pub fn parse_book_ids(field: &'static str, raw: &[String]) -> AppResult<Vec<Uuid>> {
    raw.iter()
        .map(|value| {
            Uuid::parse_str(value.trim()).map_err(|_| AppError::InvalidIdentifier {
                field,
                value: value.clone(),
            })
        })
        .collect()
}

/// First occurrence of each identifier, in request order
pub fn distinct_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen
}
