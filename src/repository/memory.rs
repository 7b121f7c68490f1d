//! In-process storage
//!
//! A single mutex guards the whole state. A transaction holds the guard for its
//! lifetime and works on a copy, so transactions are serial and a dropped
//! transaction leaves no trace.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{LibraryStore, LibraryTx};
use crate::{
    error::{AppError, AppResult},
    models::{Book, BorrowDetails, BorrowRecord, Student},
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    students: Vec<Student>,
    books: Vec<Book>,
    records: Vec<BorrowRecord>,
    last_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn book_by_id(&self, id: i64) -> AppResult<&Book> {
        self.books
            .iter()
            .find(|b| b.id == id)
            .ok_or_else(|| AppError::Internal(format!("borrow record points at missing book {}", id)))
    }

    fn details(&self, record: &BorrowRecord) -> AppResult<BorrowDetails> {
        Ok(BorrowDetails {
            record: record.clone(),
            book: self.book_by_id(record.book_id)?.clone(),
        })
    }
}

#[derive(Clone, Default)]
pub struct MemoryLibraryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLibraryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a student, as the identity provider would
    pub async fn add_student(&self, mut student: Student) -> Student {
        let mut state = self.state.lock().await;
        student.id = state.next_id();
        state.students.push(student.clone());
        student
    }

    /// Put a book on the shelf without going through the catalog service
    pub async fn add_book(&self, mut book: Book) -> Book {
        let mut state = self.state.lock().await;
        book.id = state.next_id();
        state.books.push(book.clone());
        book
    }

    /// Seed an existing loan; inventory is left as given
    pub async fn add_record(&self, mut record: BorrowRecord) -> BorrowRecord {
        let mut state = self.state.lock().await;
        record.id = state.next_id();
        state.records.push(record.clone());
        record
    }

    /// Current state of a book, soft-deleted or not
    pub async fn book(&self, uuid: Uuid) -> Option<Book> {
        let state = self.state.lock().await;
        state.books.iter().find(|b| b.uuid == uuid).cloned()
    }

    pub async fn records(&self) -> Vec<BorrowRecord> {
        self.state.lock().await.records.clone()
    }
}

#[async_trait]
impl LibraryStore for MemoryLibraryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn begin(&self) -> AppResult<Box<dyn LibraryTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryLibraryTx { guard, work }))
    }

    async fn find_student(&self, username: &str) -> AppResult<Option<Student>> {
        let state = self.state.lock().await;
        Ok(state.students.iter().find(|s| s.username == username).cloned())
    }

    async fn list_books(&self) -> AppResult<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state.books.iter().filter(|b| !b.is_deleted()).cloned().collect();
        books.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(books)
    }

    async fn find_book(&self, uuid: Uuid) -> AppResult<Option<Book>> {
        let state = self.state.lock().await;
        Ok(state.books.iter().find(|b| b.uuid == uuid && !b.is_deleted()).cloned())
    }

    async fn insert_book(&self, book: Book) -> AppResult<Book> {
        {
            let state = self.state.lock().await;
            if state.books.iter().any(|b| b.uuid == book.uuid) {
                return Err(AppError::Conflict(format!("Book {} already exists", book.uuid)));
            }
        }
        Ok(self.add_book(book).await)
    }

    async fn soft_delete_book(&self, uuid: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state.books.iter_mut().find(|b| b.uuid == uuid && !b.is_deleted()) {
            Some(book) => {
                book.deleted_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge_book(&self, uuid: Uuid) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let Some(book_id) = state.books.iter().find(|b| b.uuid == uuid).map(|b| b.id) else {
            return Ok(false);
        };
        if state.records.iter().any(|r| r.book_id == book_id) {
            return Err(AppError::Conflict(format!(
                "Book {} is referenced by borrow records",
                uuid
            )));
        }
        state.books.retain(|b| b.id != book_id);
        Ok(true)
    }

    async fn list_student_records(&self, student_id: i64, open_only: bool) -> AppResult<Vec<BorrowDetails>> {
        let state = self.state.lock().await;
        let mut records: Vec<&BorrowRecord> = state
            .records
            .iter()
            .filter(|r| r.student_id == student_id && (!open_only || r.is_borrowed))
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records.into_iter().map(|r| state.details(r)).collect()
    }
}

pub struct MemoryLibraryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

#[async_trait]
impl LibraryTx for MemoryLibraryTx {
    async fn find_student(&mut self, username: &str) -> AppResult<Option<Student>> {
        Ok(self.work.students.iter().find(|s| s.username == username).cloned())
    }

    async fn count_open_records(&mut self, student_id: i64) -> AppResult<i64> {
        let count = self
            .work
            .records
            .iter()
            .filter(|r| r.student_id == student_id && r.is_borrowed)
            .count();
        Ok(count as i64)
    }

    async fn find_books(&mut self, ids: &[Uuid]) -> AppResult<Vec<Book>> {
        let mut books: Vec<Book> = self
            .work
            .books
            .iter()
            .filter(|b| ids.contains(&b.uuid) && !b.is_deleted())
            .cloned()
            .collect();
        books.sort_by_key(|b| b.id);
        Ok(books)
    }

    async fn find_student_records(
        &mut self,
        student_id: i64,
        book_ids: &[Uuid],
        open_only: bool,
    ) -> AppResult<Vec<BorrowDetails>> {
        let mut found = Vec::new();
        for record in &self.work.records {
            if record.student_id != student_id || (open_only && !record.is_borrowed) {
                continue;
            }
            let details = self.work.details(record)?;
            if book_ids.contains(&details.book.uuid) {
                found.push(details);
            }
        }
        found.sort_by_key(|d| (d.book.id, d.record.created_at, d.record.id));
        Ok(found)
    }

    async fn min_open_deadline(&mut self, book_id: i64) -> AppResult<Option<NaiveDate>> {
        Ok(self
            .work
            .records
            .iter()
            .filter(|r| r.book_id == book_id && r.is_borrowed)
            .filter_map(|r| r.deadline_date)
            .min())
    }

    async fn insert_records(&mut self, records: &[BorrowRecord]) -> AppResult<u64> {
        for record in records {
            self.work.book_by_id(record.book_id)?;
            let open_exists = self
                .work
                .records
                .iter()
                .any(|r| r.is_borrowed && r.student_id == record.student_id && r.book_id == record.book_id);
            if record.is_borrowed && open_exists {
                return Err(AppError::Conflict(format!(
                    "student {} already holds an open loan for book {}",
                    record.student_id, record.book_id
                )));
            }
            let mut record = record.clone();
            record.id = self.work.next_id();
            self.work.records.push(record);
        }
        Ok(records.len() as u64)
    }

    async fn update_records(&mut self, records: &[BorrowRecord]) -> AppResult<u64> {
        let mut updated = 0;
        for record in records {
            if let Some(stored) = self.work.records.iter_mut().find(|r| r.id == record.id) {
                stored.is_borrowed = record.is_borrowed;
                stored.deadline_date = record.deadline_date;
                stored.count_extend = record.count_extend;
                stored.updated_at = record.updated_at;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn save_book(&mut self, book: &Book) -> AppResult<()> {
        if book.quantity < 0 {
            return Err(AppError::Internal(format!("book {} quantity would go negative", book.uuid)));
        }
        let stored = self
            .work
            .books
            .iter_mut()
            .find(|b| b.id == book.id)
            .ok_or_else(|| AppError::Internal(format!("book {} is not stored", book.uuid)))?;
        stored.quantity = book.quantity;
        stored.nearest_return_date = book.nearest_return_date;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryLibraryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
