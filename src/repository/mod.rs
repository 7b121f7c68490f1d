//! Repository layer: storage behind explicit unit-of-work traits
//!
//! Every borrow, return or extend request runs inside one [`LibraryTx`]. Reads that
//! feed a decision and the writes that carry it out share that transaction;
//! dropping it without calling [`LibraryTx::commit`] discards every write.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Book, BorrowDetails, BorrowRecord, Student},
};

pub use memory::MemoryLibraryStore;
pub use postgres::PgLibraryStore;

/// Entry point to storage
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Cheap round trip proving storage answers
    async fn ping(&self) -> AppResult<()>;

    /// Open a transaction scoped to one request
    async fn begin(&self) -> AppResult<Box<dyn LibraryTx>>;

    /// Student by username
    async fn find_student(&self, username: &str) -> AppResult<Option<Student>>;

    /// Books that are not soft-deleted, ordered by title
    async fn list_books(&self) -> AppResult<Vec<Book>>;

    /// Book by public identifier, soft-deleted ones excluded
    async fn find_book(&self, uuid: Uuid) -> AppResult<Option<Book>>;

    async fn insert_book(&self, book: Book) -> AppResult<Book>;

    /// Mark a book deleted. Returns false when no live book has that identifier.
    async fn soft_delete_book(&self, uuid: Uuid, at: DateTime<Utc>) -> AppResult<bool>;

    /// Remove a book row for good. Fails with `Conflict` while any record references it.
    async fn purge_book(&self, uuid: Uuid) -> AppResult<bool>;

    /// A student's records with their books, oldest first; `open_only` keeps open loans
    async fn list_student_records(&self, student_id: i64, open_only: bool) -> AppResult<Vec<BorrowDetails>>;
}

/// Reads and writes inside one transaction
#[async_trait]
pub trait LibraryTx: Send {
    /// Student by username, locked until the transaction ends
    async fn find_student(&mut self, username: &str) -> AppResult<Option<Student>>;

    /// Number of open records held by a student
    async fn count_open_records(&mut self, student_id: i64) -> AppResult<i64>;

    /// Non-deleted books whose identifier is in `ids`, locked, in storage order.
    /// Unknown identifiers are simply absent from the result.
    async fn find_books(&mut self, ids: &[Uuid]) -> AppResult<Vec<Book>>;

    /// A student's records restricted to books in `book_ids`, with the books, locked.
    /// `open_only` keeps records with `is_borrowed = true`.
    async fn find_student_records(
        &mut self,
        student_id: i64,
        book_ids: &[Uuid],
        open_only: bool,
    ) -> AppResult<Vec<BorrowDetails>>;

    /// Earliest deadline among a book's open records, as seen by this transaction
    async fn min_open_deadline(&mut self, book_id: i64) -> AppResult<Option<NaiveDate>>;

    async fn insert_records(&mut self, records: &[BorrowRecord]) -> AppResult<u64>;

    /// Persist state, deadline and extension count of existing records
    async fn update_records(&mut self, records: &[BorrowRecord]) -> AppResult<u64>;

    /// Persist quantity and nearest return date
    async fn save_book(&mut self, book: &Book) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
