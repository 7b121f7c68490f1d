//! Borrow record model and related types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::book::Book;

/// One loan event. Never deleted: a return is a state change.
#[derive(Debug, Clone, PartialEq)]
pub struct BorrowRecord {
    pub id: i64,
    pub uuid: Uuid,
    pub student_id: i64,
    pub book_id: i64,
    pub is_borrowed: bool,
    /// Present iff `is_borrowed`
    pub deadline_date: Option<NaiveDate>,
    pub count_extend: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BorrowRecord {
    /// A fresh open loan
    pub fn open(student_id: i64, book_id: i64, deadline: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            student_id,
            book_id,
            is_borrowed: true,
            deadline_date: Some(deadline),
            count_extend: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_returned(&mut self, now: DateTime<Utc>) {
        self.is_borrowed = false;
        self.deadline_date = None;
        self.updated_at = now;
    }

    pub fn can_extend(&self, max_count: i32) -> bool {
        self.count_extend < max_count
    }

    /// Bump the extension counter and move the deadline
    pub fn extend(&mut self, deadline: NaiveDate, now: DateTime<Utc>) {
        self.count_extend += 1;
        self.deadline_date = Some(deadline);
        self.updated_at = now;
    }

    pub fn borrowed_at(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// Borrow record joined with its book
#[derive(Debug, Clone)]
pub struct BorrowDetails {
    pub record: BorrowRecord,
    pub book: Book,
}

/// Borrow record as listed to librarians and students
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BorrowEntry {
    pub book: Book,
    pub is_borrowed: bool,
    pub count_extend: i32,
    pub borrowed_at: NaiveDate,
    pub deadline_date: Option<NaiveDate>,
}

impl From<BorrowDetails> for BorrowEntry {
    fn from(details: BorrowDetails) -> Self {
        Self {
            borrowed_at: details.record.borrowed_at(),
            is_borrowed: details.record.is_borrowed,
            count_extend: details.record.count_extend,
            deadline_date: details.record.deadline_date,
            book: details.book,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BorrowAction {
    Borrow,
    Return,
    Extend,
}

impl std::fmt::Display for BorrowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BorrowAction::Borrow => "borrow",
            BorrowAction::Return => "return",
            BorrowAction::Extend => "extend",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a committed borrow, return or extend batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowSummary {
    pub action: BorrowAction,
    pub count: usize,
    pub student_name: String,
}

impl BorrowSummary {
    pub fn message(&self) -> String {
        match self.action {
            BorrowAction::Borrow => format!("Success add {} borrowed book to {}.", self.count, self.student_name),
            BorrowAction::Return => format!("Success return {} borrowed book from {}.", self.count, self.student_name),
            BorrowAction::Extend => format!("Success extend {} borrowed book from {}.", self.count, self.student_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_return_clears_deadline() {
        let now = Utc::now();
        let mut record = BorrowRecord::open(1, 2, date(2024, 3, 1), now);
        assert!(record.is_borrowed);

        record.mark_returned(now);
        assert!(!record.is_borrowed);
        assert_eq!(record.deadline_date, None);
    }

    #[test]
    fn test_extend_moves_deadline() {
        let now = Utc::now();
        let mut record = BorrowRecord::open(1, 2, date(2024, 3, 1), now);
        assert!(record.can_extend(1));

        record.extend(date(2024, 3, 20), now);
        assert_eq!(record.count_extend, 1);
        assert_eq!(record.deadline_date, Some(date(2024, 3, 20)));
        assert!(!record.can_extend(1));
    }

    #[test]
    fn test_summary_messages() {
        let summary = BorrowSummary {
            action: BorrowAction::Borrow,
            count: 2,
            student_name: "eko aziz".into(),
        };
        assert_eq!(summary.message(), "Success add 2 borrowed book to eko aziz.");

        let summary = BorrowSummary { action: BorrowAction::Return, ..summary };
        assert_eq!(summary.message(), "Success return 2 borrowed book from eko aziz.");
    }
}
