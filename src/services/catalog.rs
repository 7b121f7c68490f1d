//! Catalog service: book administration and loan listings

use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{Book, BorrowEntry, CreateBook, Student},
    repository::LibraryStore,
};

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn LibraryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Whether storage answers
    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await
    }

    /// All live books, ordered by title
    pub async fn list_books(&self) -> AppResult<Vec<Book>> {
        self.store.list_books().await
    }

    pub async fn create_book(&self, data: CreateBook) -> AppResult<Book> {
        let data = data.trimmed();
        data.validate()?;
        let book = self
            .store
            .insert_book(Book::new(data.title, data.author, data.quantity))
            .await?;
        tracing::info!("Book {} created with {} copies", book.uuid, book.quantity);
        Ok(book)
    }

    /// Soft delete by default; `purge` removes the row and is refused while loans reference it
    pub async fn delete_book(&self, uuid: Uuid, purge: bool) -> AppResult<()> {
        let deleted = if purge {
            self.store.purge_book(uuid).await?
        } else {
            self.store.soft_delete_book(uuid, self.clock.now()).await?
        };

        if !deleted {
            return Err(AppError::NotFound("Book not found.".to_string()));
        }
        tracing::info!("Book {} deleted (purge: {})", uuid, purge);
        Ok(())
    }

    /// A student's open loans
    pub async fn student_loans(&self, username: &str) -> AppResult<Vec<BorrowEntry>> {
        let student = self.student(username).await?;
        self.entries(&student, true).await
    }

    /// Every loan a student ever had
    pub async fn student_history(&self, username: &str) -> AppResult<Vec<BorrowEntry>> {
        let student = self.student(username).await?;
        self.entries(&student, false).await
    }

    async fn student(&self, username: &str) -> AppResult<Student> {
        self.store
            .find_student(username)
            .await?
            .ok_or_else(AppError::student_not_found)
    }

    async fn entries(&self, student: &Student, open_only: bool) -> AppResult<Vec<BorrowEntry>> {
        let records = self.store.list_student_records(student.id, open_only).await?;
        Ok(records.into_iter().map(BorrowEntry::from).collect())
    }
}
