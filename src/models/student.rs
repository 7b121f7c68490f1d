//! Student model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A borrower, as resolved from the identity provider's user table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Student {
    #[serde(skip)]
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl Student {
    pub fn new(username: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            username: username.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// Display name used in result messages
    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}
