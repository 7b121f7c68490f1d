//! Postgres storage

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, Pool, Postgres, Transaction};
use uuid::Uuid;

use super::{LibraryStore, LibraryTx};
use crate::{
    error::{AppError, AppResult},
    models::{Book, BorrowDetails, BorrowRecord, Student},
};

const BOOK_COLUMNS: &str = "id, uuid, title, author, quantity, nearest_return_date, deleted_at";

const DETAILS_SELECT: &str = r#"
    SELECT r.id, r.uuid, r.student_id, r.book_id, r.is_borrowed, r.deadline_date,
           r.count_extend, r.created_at, r.updated_at,
           b.uuid AS book_uuid, b.title AS book_title, b.author AS book_author,
           b.quantity AS book_quantity, b.nearest_return_date AS book_nearest_return_date,
           b.deleted_at AS book_deleted_at
    FROM borrow_records r
    JOIN books b ON b.id = r.book_id
"#;

#[derive(FromRow)]
struct BorrowDetailsRow {
    id: i64,
    uuid: Uuid,
    student_id: i64,
    book_id: i64,
    is_borrowed: bool,
    deadline_date: Option<NaiveDate>,
    count_extend: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    book_uuid: Uuid,
    book_title: String,
    book_author: String,
    book_quantity: i32,
    book_nearest_return_date: Option<NaiveDate>,
    book_deleted_at: Option<DateTime<Utc>>,
}

impl From<BorrowDetailsRow> for BorrowDetails {
    fn from(row: BorrowDetailsRow) -> Self {
        BorrowDetails {
            book: Book {
                id: row.book_id,
                uuid: row.book_uuid,
                title: row.book_title,
                author: row.book_author,
                quantity: row.book_quantity,
                nearest_return_date: row.book_nearest_return_date,
                deleted_at: row.book_deleted_at,
            },
            record: BorrowRecord {
                id: row.id,
                uuid: row.uuid,
                student_id: row.student_id,
                book_id: row.book_id,
                is_borrowed: row.is_borrowed,
                deadline_date: row.deadline_date,
                count_extend: row.count_extend,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
        }
    }
}

#[derive(Clone)]
pub struct PgLibraryStore {
    pool: Pool<Postgres>,
}

impl PgLibraryStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LibraryStore for PgLibraryStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> AppResult<Box<dyn LibraryTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLibraryTx { tx }))
    }

    async fn find_student(&self, username: &str) -> AppResult<Option<Student>> {
        let student = sqlx::query_as::<_, Student>(
            "SELECT id, username, first_name, last_name FROM students WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(student)
    }

    async fn list_books(&self) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>(&format!(
            "SELECT {} FROM books WHERE deleted_at IS NULL ORDER BY title",
            BOOK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(books)
    }

    async fn find_book(&self, uuid: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!(
            "SELECT {} FROM books WHERE uuid = $1 AND deleted_at IS NULL",
            BOOK_COLUMNS
        ))
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(book)
    }

    async fn insert_book(&self, book: Book) -> AppResult<Book> {
        let book = sqlx::query_as::<_, Book>(&format!(
            r#"
            INSERT INTO books (uuid, title, author, quantity, nearest_return_date)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(book.uuid)
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.quantity)
        .bind(book.nearest_return_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(book)
    }

    async fn soft_delete_book(&self, uuid: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        let rows = sqlx::query(
            "UPDATE books SET deleted_at = $2, updated_at = $2 WHERE uuid = $1 AND deleted_at IS NULL",
        )
        .bind(uuid)
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn purge_book(&self, uuid: Uuid) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        let book_id: Option<i64> = sqlx::query_scalar("SELECT id FROM books WHERE uuid = $1 FOR UPDATE")
            .bind(uuid)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(book_id) = book_id else {
            return Ok(false);
        };

        let referenced: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM borrow_records WHERE book_id = $1)")
                .bind(book_id)
                .fetch_one(&mut *tx)
                .await?;
        if referenced {
            return Err(AppError::Conflict(format!(
                "Book {} is referenced by borrow records",
                uuid
            )));
        }

        sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_student_records(&self, student_id: i64, open_only: bool) -> AppResult<Vec<BorrowDetails>> {
        let rows = sqlx::query_as::<_, BorrowDetailsRow>(&format!(
            "{} WHERE r.student_id = $1 AND ($2 = FALSE OR r.is_borrowed) ORDER BY r.created_at, r.id",
            DETAILS_SELECT
        ))
        .bind(student_id)
        .bind(open_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BorrowDetails::from).collect())
    }
}

/// One request's transaction. Dropped without commit, sqlx rolls it back.
pub struct PgLibraryTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LibraryTx for PgLibraryTx {
    async fn find_student(&mut self, username: &str) -> AppResult<Option<Student>> {
        // Row lock serialises concurrent requests for the same student
        let student = sqlx::query_as::<_, Student>(
            "SELECT id, username, first_name, last_name FROM students WHERE username = $1 FOR UPDATE",
        )
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(student)
    }

    async fn count_open_records(&mut self, student_id: i64) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrow_records WHERE student_id = $1 AND is_borrowed",
        )
        .bind(student_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn find_books(&mut self, ids: &[Uuid]) -> AppResult<Vec<Book>> {
        // Locked in key order so overlapping batches cannot deadlock
        let books = sqlx::query_as::<_, Book>(&format!(
            "SELECT {} FROM books WHERE uuid = ANY($1) AND deleted_at IS NULL ORDER BY id FOR UPDATE",
            BOOK_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(books)
    }

    async fn find_student_records(
        &mut self,
        student_id: i64,
        book_ids: &[Uuid],
        open_only: bool,
    ) -> AppResult<Vec<BorrowDetails>> {
        let rows = sqlx::query_as::<_, BorrowDetailsRow>(&format!(
            r#"{}
            WHERE r.student_id = $1 AND b.uuid = ANY($2) AND ($3 = FALSE OR r.is_borrowed)
            ORDER BY b.id, r.created_at, r.id
            FOR UPDATE
            "#,
            DETAILS_SELECT
        ))
        .bind(student_id)
        .bind(book_ids)
        .bind(open_only)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(BorrowDetails::from).collect())
    }

    async fn min_open_deadline(&mut self, book_id: i64) -> AppResult<Option<NaiveDate>> {
        let deadline: Option<NaiveDate> = sqlx::query_scalar(
            "SELECT MIN(deadline_date) FROM borrow_records WHERE book_id = $1 AND is_borrowed",
        )
        .bind(book_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(deadline)
    }

    async fn insert_records(&mut self, records: &[BorrowRecord]) -> AppResult<u64> {
        let mut inserted = 0;
        for record in records {
            inserted += sqlx::query(
                r#"
                INSERT INTO borrow_records
                    (uuid, student_id, book_id, is_borrowed, deadline_date, count_extend, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(record.uuid)
            .bind(record.student_id)
            .bind(record.book_id)
            .bind(record.is_borrowed)
            .bind(record.deadline_date)
            .bind(record.count_extend)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        }
        Ok(inserted)
    }

    async fn update_records(&mut self, records: &[BorrowRecord]) -> AppResult<u64> {
        let mut updated = 0;
        for record in records {
            updated += sqlx::query(
                r#"
                UPDATE borrow_records
                SET is_borrowed = $1, deadline_date = $2, count_extend = $3, updated_at = $4
                WHERE id = $5
                "#,
            )
            .bind(record.is_borrowed)
            .bind(record.deadline_date)
            .bind(record.count_extend)
            .bind(record.updated_at)
            .bind(record.id)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        }
        Ok(updated)
    }

    async fn save_book(&mut self, book: &Book) -> AppResult<()> {
        sqlx::query(
            "UPDATE books SET quantity = $1, nearest_return_date = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(book.quantity)
        .bind(book.nearest_return_date)
        .bind(book.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
