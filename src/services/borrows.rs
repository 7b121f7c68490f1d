//! Borrow policy engine
//!
//! Validates borrow, return and extend batches against quota, stock, duplicate
//! and extension rules, then applies the record and inventory changes in the
//! same transaction. Every check finishes before the first write.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use uuid::Uuid;

use super::inventory::InventoryLedger;
use crate::{
    clock::Clock,
    config::{BorrowConfig, ReturnMatchPolicy},
    error::{AppError, AppResult, BOOK_UUIDS_FIELD},
    models::{
        book::{distinct_ids, parse_book_ids},
        Book, BorrowAction, BorrowDetails, BorrowRecord, BorrowSummary,
    },
    repository::{LibraryStore, LibraryTx},
};

#[derive(Clone)]
pub struct BorrowService {
    store: Arc<dyn LibraryStore>,
    config: BorrowConfig,
    clock: Arc<dyn Clock>,
    ledger: InventoryLedger,
}

impl BorrowService {
    pub fn new(store: Arc<dyn LibraryStore>, config: BorrowConfig, clock: Arc<dyn Clock>) -> Self {
        let ledger = InventoryLedger::new(config.nearest_return_policy);
        Self {
            store,
            config,
            clock,
            ledger,
        }
    }

    /// Lend each requested book to the student
    pub async fn borrow_books(&self, username: &str, book_uuids: Option<&[String]>) -> AppResult<BorrowSummary> {
        let result = self.borrow(username, book_uuids).await;
        log_outcome(BorrowAction::Borrow, username, &result);
        result
    }

    /// Close the student's loans for the requested books
    pub async fn return_books(&self, username: &str, book_uuids: Option<&[String]>) -> AppResult<BorrowSummary> {
        let result = self.give_back(username, book_uuids).await;
        log_outcome(BorrowAction::Return, username, &result);
        result
    }

    /// Push back the deadline of the student's open loans for the requested books
    pub async fn extend_books(&self, username: &str, book_uuids: Option<&[String]>) -> AppResult<BorrowSummary> {
        let result = self.extend(username, book_uuids).await;
        log_outcome(BorrowAction::Extend, username, &result);
        result
    }

    async fn borrow(&self, username: &str, book_uuids: Option<&[String]>) -> AppResult<BorrowSummary> {
        let mut tx = self.store.begin().await?;

        let student = tx
            .find_student(username)
            .await?
            .ok_or_else(AppError::student_not_found)?;
        let open_count = tx.count_open_records(student.id).await?;

        let requested = self.check_batch(book_uuids)?;
        let books = resolve_books(tx.as_mut(), &requested).await?;

        let held: Vec<BorrowDetails> = tx
            .find_student_records(student.id, &requested, true)
            .await?
            .into_iter()
            .filter(|d| books.iter().any(|b| b.id == d.book.id))
            .collect();
        if let Some(held) = in_request_order(&requested, held, |d| d.book.uuid).into_iter().next() {
            return Err(AppError::DuplicateLoan {
                field: BOOK_UUIDS_FIELD,
                title: held.book.title,
            });
        }

        if books.is_empty() {
            return Err(AppError::too_few_books(self.config.min_books));
        }
        // Raw request length, duplicates included
        if requested.len() as i64 + open_count > self.config.max_books as i64 {
            return Err(AppError::too_many_books(self.config.max_books));
        }

        if let Some(book) = books.iter().find(|b| !b.is_available()) {
            return Err(AppError::OutOfStock {
                field: BOOK_UUIDS_FIELD,
                title: book.title.clone(),
            });
        }

        let deadline = self.deadline()?;
        let now = self.clock.now();
        let records: Vec<BorrowRecord> = books
            .iter()
            .map(|book| BorrowRecord::open(student.id, book.id, deadline, now))
            .collect();

        let created = tx.insert_records(&records).await?;
        for mut book in books {
            self.ledger.record_borrowed(tx.as_mut(), &mut book).await?;
        }
        tx.commit().await?;

        Ok(BorrowSummary {
            action: BorrowAction::Borrow,
            count: created as usize,
            student_name: student.name(),
        })
    }

    async fn give_back(&self, username: &str, book_uuids: Option<&[String]>) -> AppResult<BorrowSummary> {
        let mut tx = self.store.begin().await?;

        let student = tx
            .find_student(username)
            .await?
            .ok_or_else(AppError::student_not_found)?;

        let requested = self.check_batch(book_uuids)?;
        let matched = tx.find_student_records(student.id, &requested, false).await?;
        if matched.is_empty() {
            return Err(AppError::too_few_books(self.config.min_books));
        }

        let mut closing: Vec<BorrowDetails> = Vec::new();
        for id in distinct_ids(&requested) {
            let for_book: Vec<&BorrowDetails> = matched.iter().filter(|d| d.book.uuid == id).collect();
            let Some(first) = for_book.first() else {
                continue;
            };
            let already_returned = match self.config.return_match_policy {
                ReturnMatchPolicy::AnyClosedFails => for_book.iter().find(|d| !d.record.is_borrowed),
                ReturnMatchPolicy::OpenRecordOnly if for_book.iter().all(|d| !d.record.is_borrowed) => Some(first),
                ReturnMatchPolicy::OpenRecordOnly => None,
            };
            if let Some(returned) = already_returned {
                return Err(AppError::AlreadyReturned {
                    field: BOOK_UUIDS_FIELD,
                    title: returned.book.title.clone(),
                });
            }
            closing.extend(for_book.into_iter().filter(|d| d.record.is_borrowed).cloned());
        }

        let now = self.clock.now();
        for details in &mut closing {
            details.record.mark_returned(now);
        }
        let records: Vec<BorrowRecord> = closing.iter().map(|d| d.record.clone()).collect();
        let updated = tx.update_records(&records).await?;

        for details in &mut closing {
            self.ledger.record_returned(tx.as_mut(), &mut details.book).await?;
        }
        tx.commit().await?;

        Ok(BorrowSummary {
            action: BorrowAction::Return,
            count: updated as usize,
            student_name: student.name(),
        })
    }

    async fn extend(&self, username: &str, book_uuids: Option<&[String]>) -> AppResult<BorrowSummary> {
        let mut tx = self.store.begin().await?;

        let student = tx
            .find_student(username)
            .await?
            .ok_or_else(AppError::student_not_found)?;

        let requested = self.check_batch(book_uuids)?;
        let open = tx.find_student_records(student.id, &requested, true).await?;
        if open.is_empty() {
            return Err(AppError::too_few_books(self.config.min_books));
        }
        let mut extending = in_request_order(&requested, open, |d| d.book.uuid);

        if let Some(capped) = extending
            .iter()
            .find(|d| !d.record.can_extend(self.config.extend_max_count))
        {
            return Err(AppError::ExtendLimitReached {
                field: BOOK_UUIDS_FIELD,
                title: capped.book.title.clone(),
            });
        }

        // From today, not from the old deadline
        let deadline = self.deadline()?;
        let now = self.clock.now();
        for details in &mut extending {
            details.record.extend(deadline, now);
        }
        let records: Vec<BorrowRecord> = extending.into_iter().map(|d| d.record).collect();
        let updated = tx.update_records(&records).await?;
        tx.commit().await?;

        Ok(BorrowSummary {
            action: BorrowAction::Extend,
            count: updated as usize,
            student_name: student.name(),
        })
    }

    /// Presence and size of the batch, then identifier syntax
    fn check_batch(&self, book_uuids: Option<&[String]>) -> AppResult<Vec<Uuid>> {
        let raw = book_uuids.ok_or(AppError::MissingField { field: BOOK_UUIDS_FIELD })?;

        if raw.len() < self.config.min_books {
            return Err(AppError::too_few_books(self.config.min_books));
        }
        if raw.len() > self.config.max_books {
            return Err(AppError::too_many_books(self.config.max_books));
        }

        parse_book_ids(BOOK_UUIDS_FIELD, raw)
    }

    fn deadline(&self) -> AppResult<NaiveDate> {
        let today = self.clock.today();
        Duration::try_days(self.config.deadline_days)
            .and_then(|period| today.checked_add_signed(period))
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "loan period of {} days from {} is out of range",
                    self.config.deadline_days, today
                ))
            })
    }
}

/// Requested books that exist, once each, in request order
async fn resolve_books(tx: &mut dyn LibraryTx, requested: &[Uuid]) -> AppResult<Vec<Book>> {
    let found = tx.find_books(requested).await?;
    Ok(in_request_order(requested, found, |b| b.uuid))
}

/// Sort `items` by the position of their book in the request
fn in_request_order<T>(requested: &[Uuid], mut items: Vec<T>, key: impl Fn(&T) -> Uuid) -> Vec<T> {
    items.sort_by_key(|item| {
        let id = key(item);
        requested.iter().position(|r| *r == id).unwrap_or(usize::MAX)
    });
    items
}

fn log_outcome(action: BorrowAction, username: &str, result: &AppResult<BorrowSummary>) {
    match result {
        Ok(summary) => tracing::info!(
            "{} committed for student {}: {} book(s)",
            action,
            username,
            summary.count
        ),
        Err(AppError::Database(e)) => tracing::warn!("{} for student {} rolled back: {}", action, username, e),
        Err(e) => tracing::debug!("{} rejected for student {}: {}", action, username, e),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        clock::FixedClock,
        config::NearestReturnPolicy,
        models::Student,
        repository::MemoryLibraryStore,
    };

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 2).unwrap()
    }

    struct Fixture {
        store: MemoryLibraryStore,
        service: BorrowService,
        student: Student,
    }

    async fn fixture_with(config: BorrowConfig) -> Fixture {
        let store = MemoryLibraryStore::new();
        let student = store.add_student(Student::new("eko", "eko", "aziz")).await;
        let service = BorrowService::new(
            Arc::new(store.clone()),
            config,
            Arc::new(FixedClock::on(today())),
        );
        Fixture { store, service, student }
    }

    async fn fixture() -> Fixture {
        fixture_with(BorrowConfig::default()).await
    }

    fn ids(books: &[&Book]) -> Vec<String> {
        books.iter().map(|b| b.uuid.to_string()).collect()
    }

    async fn open_loans(f: &Fixture, count: usize) {
        for i in 0..count {
            let book = f.store.add_book(Book::new(format!("held {}", i), "someone", 5)).await;
            f.store
                .add_record(BorrowRecord::open(f.student.id, book.id, today(), Utc::now()))
                .await;
        }
    }

    #[tokio::test]
    async fn test_borrow_two_books() {
        let f = fixture().await;
        let a = f.store.add_book(Book::new("programming", "Knuth", 2)).await;
        let b = f.store.add_book(Book::new("language", "Chomsky", 1)).await;

        let summary = f.service.borrow_books("eko", Some(&ids(&[&a, &b]))).await.unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.student_name, "eko aziz");
        assert_eq!(summary.message(), "Success add 2 borrowed book to eko aziz.");

        let a = f.store.book(a.uuid).await.unwrap();
        let b = f.store.book(b.uuid).await.unwrap();
        assert_eq!(a.quantity, 1);
        assert_eq!(a.nearest_return_date, None);
        assert_eq!(b.quantity, 0);
        assert_eq!(b.nearest_return_date, Some(today() + Duration::days(30)));

        let records = f.store.records().await;
        assert_eq!(records.len(), 2);
        for record in records {
            assert!(record.is_borrowed);
            assert_eq!(record.count_extend, 0);
            assert_eq!(record.deadline_date, Some(today() + Duration::days(30)));
        }
    }

    #[tokio::test]
    async fn test_borrow_last_copy_keeps_earlier_deadline_of_other_loan() {
        let f = fixture().await;
        let other = f.store.add_student(Student::new("ana", "Ana", "Lim")).await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        f.store
            .add_record(BorrowRecord::open(other.id, book.id, today(), Utc::now()))
            .await;

        f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap();

        let book = f.store.book(book.uuid).await.unwrap();
        assert_eq!(book.quantity, 0);
        assert_eq!(book.nearest_return_date, Some(today()));
    }

    #[tokio::test]
    async fn test_borrow_unknown_student() {
        let f = fixture().await;
        let err = f.service.borrow_books("random", Some(&[])).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(err.to_string(), "Student not found.");
    }

    #[tokio::test]
    async fn test_borrow_missing_and_empty_list() {
        let f = fixture().await;

        let err = f.service.borrow_books("eko", None).await.unwrap_err();
        assert!(matches!(err, AppError::MissingField { field: "book_uuids" }));

        let err = f.service.borrow_books("eko", Some(&[])).await.unwrap_err();
        assert_eq!(err.to_string(), "Choose at least 1 book.");
    }

    #[tokio::test]
    async fn test_borrow_batch_too_large() {
        let f = fixture().await;
        let raw: Vec<String> = (1..=11).map(|i| i.to_string()).collect();
        let err = f.service.borrow_books("eko", Some(&raw)).await.unwrap_err();
        assert_eq!(err.to_string(), "Exceed the quota, maximum 10 books.");
    }

    #[tokio::test]
    async fn test_borrow_malformed_identifier() {
        let f = fixture().await;
        let err = f.service.borrow_books("eko", Some(&["1".to_string()])).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidIdentifier { .. }));
        assert!(err.to_string().contains("is not a valid UUID."));
    }

    #[tokio::test]
    async fn test_borrow_unknown_books_only() {
        let f = fixture().await;
        let raw = vec![Uuid::new_v4().to_string()];
        let err = f.service.borrow_books("eko", Some(&raw)).await.unwrap_err();
        assert_eq!(err.to_string(), "Choose at least 1 book.");
    }

    #[tokio::test]
    async fn test_borrow_drops_unknown_books() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        let raw = vec![Uuid::new_v4().to_string(), book.uuid.to_string()];

        let summary = f.service.borrow_books("eko", Some(&raw)).await.unwrap();
        assert_eq!(summary.count, 1);
    }

    #[tokio::test]
    async fn test_borrow_soft_deleted_book_is_unresolvable() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        f.store.soft_delete_book(book.uuid, Utc::now()).await.unwrap();

        let err = f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap_err();
        assert_eq!(err.to_string(), "Choose at least 1 book.");
    }

    #[tokio::test]
    async fn test_borrow_exceeds_quota_with_current_loans() {
        let f = fixture().await;
        open_loans(&f, 9).await;
        let a = f.store.add_book(Book::new("programming", "Knuth", 2)).await;
        let b = f.store.add_book(Book::new("language", "Chomsky", 1)).await;

        let err = f.service.borrow_books("eko", Some(&ids(&[&a, &b]))).await.unwrap_err();
        assert_eq!(err.to_string(), "Exceed the quota, maximum 10 books.");
        assert_eq!(f.store.book(a.uuid).await.unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_quota_boundaries() {
        let f = fixture().await;
        let mut books = Vec::new();
        for i in 0..10 {
            books.push(f.store.add_book(Book::new(format!("book {}", i), "author", 1)).await);
        }
        let refs: Vec<&Book> = books.iter().collect();
        let summary = f.service.borrow_books("eko", Some(&ids(&refs))).await.unwrap();
        assert_eq!(summary.count, 10);

        let extra = f.store.add_book(Book::new("one more", "author", 1)).await;
        let err = f.service.borrow_books("eko", Some(&ids(&[&extra]))).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaViolation { .. }));
    }

    #[tokio::test]
    async fn test_borrow_out_of_stock_aborts_batch() {
        let f = fixture().await;
        let a = f.store.add_book(Book::new("programming", "Knuth", 2)).await;
        let b = f.store.add_book(Book::new("language", "Chomsky", 0)).await;

        let err = f.service.borrow_books("eko", Some(&ids(&[&a, &b]))).await.unwrap_err();
        assert_eq!(err.to_string(), "Choosen book out of stok. book title: language");
        assert_eq!(f.store.book(a.uuid).await.unwrap().quantity, 2);
        assert!(f.store.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_borrow_out_of_stock_names_first_in_request_order() {
        let f = fixture().await;
        let a = f.store.add_book(Book::new("first", "x", 0)).await;
        let b = f.store.add_book(Book::new("second", "y", 0)).await;

        let err = f.service.borrow_books("eko", Some(&ids(&[&b, &a]))).await.unwrap_err();
        assert!(matches!(err, AppError::OutOfStock { ref title, .. } if title == "second"));
    }

    #[tokio::test]
    async fn test_borrow_same_book_twice_is_duplicate() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 5)).await;
        f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap();

        let err = f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap_err();
        assert_eq!(err.to_string(), "Choosen book have been borrowed. book title: language");
        assert_eq!(f.store.book(book.uuid).await.unwrap().quantity, 4);
    }

    #[tokio::test]
    async fn test_duplicate_wins_over_out_of_stock() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap();

        let err = f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateLoan { .. }));
    }

    async fn borrow_return_borrow(f: &Fixture, book: &Book) -> Vec<String> {
        let batch = ids(&[book]);
        f.service.borrow_books("eko", Some(&batch)).await.unwrap();
        f.service.return_books("eko", Some(&batch)).await.unwrap();
        f.service.borrow_books("eko", Some(&batch)).await.unwrap();
        batch
    }

    #[tokio::test]
    async fn test_return_with_earlier_closed_loan_fails_by_default() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        let batch = borrow_return_borrow(&f, &book).await;

        let err = f.service.return_books("eko", Some(&batch)).await.unwrap_err();
        assert_eq!(err.to_string(), "Choosen book have been returned. book title: language");

        assert_eq!(f.store.book(book.uuid).await.unwrap().quantity, 0);
        let open = f.store.records().await.into_iter().filter(|r| r.is_borrowed).count();
        assert_eq!(open, 1);
    }

    #[tokio::test]
    async fn test_return_open_record_only_skips_earlier_closed_loan() {
        let config = BorrowConfig {
            return_match_policy: ReturnMatchPolicy::OpenRecordOnly,
            ..Default::default()
        };
        let f = fixture_with(config).await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        let batch = borrow_return_borrow(&f, &book).await;

        let summary = f.service.return_books("eko", Some(&batch)).await.unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(f.store.book(book.uuid).await.unwrap().quantity, 1);

        // Nothing open is left for this book
        let err = f.service.return_books("eko", Some(&batch)).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyReturned { ref title, .. } if title == "language"));
    }

    #[tokio::test]
    async fn test_return_round_trip() {
        let f = fixture().await;
        let a = f.store.add_book(Book::new("programming", "Knuth", 2)).await;
        let b = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        let batch = ids(&[&a, &b]);
        f.service.borrow_books("eko", Some(&batch)).await.unwrap();

        let summary = f.service.return_books("eko", Some(&batch)).await.unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.message(), "Success return 2 borrowed book from eko aziz.");

        let a = f.store.book(a.uuid).await.unwrap();
        let b = f.store.book(b.uuid).await.unwrap();
        assert_eq!(a.quantity, 2);
        assert_eq!(b.quantity, 1);
        assert_eq!(b.nearest_return_date, None);

        for record in f.store.records().await {
            assert!(!record.is_borrowed);
            assert_eq!(record.deadline_date, None);
        }
    }

    #[tokio::test]
    async fn test_return_nothing_matching() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;

        let err = f.service.return_books("eko", Some(&ids(&[&book]))).await.unwrap_err();
        assert_eq!(err.to_string(), "Choose at least 1 book.");
    }

    #[tokio::test]
    async fn test_return_already_returned_leaves_batch_untouched() {
        let f = fixture().await;
        let a = f.store.add_book(Book::new("programming", "Knuth", 2)).await;
        let b = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        f.service.borrow_books("eko", Some(&ids(&[&a, &b]))).await.unwrap();
        f.service.return_books("eko", Some(&ids(&[&b]))).await.unwrap();

        let err = f.service.return_books("eko", Some(&ids(&[&a, &b]))).await.unwrap_err();
        assert_eq!(err.to_string(), "Choosen book have been returned. book title: language");

        // a is still out
        assert_eq!(f.store.book(a.uuid).await.unwrap().quantity, 1);
        let open = f.store.records().await.into_iter().filter(|r| r.is_borrowed).count();
        assert_eq!(open, 1);
    }

    #[tokio::test]
    async fn test_return_clear_policy_drops_other_deadline() {
        let f = fixture().await;
        let other = f.store.add_student(Student::new("ana", "Ana", "Lim")).await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        f.store
            .add_record(BorrowRecord::open(other.id, book.id, today(), Utc::now()))
            .await;
        f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap();

        f.service.return_books("eko", Some(&ids(&[&book]))).await.unwrap();

        let book = f.store.book(book.uuid).await.unwrap();
        assert_eq!(book.quantity, 1);
        assert_eq!(book.nearest_return_date, None);
    }

    #[tokio::test]
    async fn test_return_recompute_policy_keeps_other_deadline() {
        let config = BorrowConfig {
            nearest_return_policy: NearestReturnPolicy::Recompute,
            ..Default::default()
        };
        let f = fixture_with(config).await;
        let other = f.store.add_student(Student::new("ana", "Ana", "Lim")).await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        f.store
            .add_record(BorrowRecord::open(other.id, book.id, today(), Utc::now()))
            .await;
        f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap();

        f.service.return_books("eko", Some(&ids(&[&book]))).await.unwrap();

        let book = f.store.book(book.uuid).await.unwrap();
        assert_eq!(book.quantity, 1);
        assert_eq!(book.nearest_return_date, Some(today()));
    }

    #[tokio::test]
    async fn test_extend_once_then_capped() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        f.store
            .add_record(BorrowRecord::open(f.student.id, book.id, today(), Utc::now()))
            .await;
        let batch = ids(&[&book]);

        let summary = f.service.extend_books("eko", Some(&batch)).await.unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.message(), "Success extend 1 borrowed book from eko aziz.");

        let record = f.store.records().await.remove(0);
        assert_eq!(record.count_extend, 1);
        assert_eq!(record.deadline_date, Some(today() + Duration::days(30)));

        let err = f.service.extend_books("eko", Some(&batch)).await.unwrap_err();
        assert_eq!(err.to_string(), "Choosen book can't be extended. book title: language");
        assert_eq!(f.store.records().await[0].count_extend, 1);
    }

    #[tokio::test]
    async fn test_extend_leaves_inventory_alone() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap();
        let before = f.store.book(book.uuid).await.unwrap();

        f.service.extend_books("eko", Some(&ids(&[&book]))).await.unwrap();

        assert_eq!(f.store.book(book.uuid).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_extend_ignores_closed_loans() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        let batch = ids(&[&book]);
        f.service.borrow_books("eko", Some(&batch)).await.unwrap();
        f.service.return_books("eko", Some(&batch)).await.unwrap();

        let err = f.service.extend_books("eko", Some(&batch)).await.unwrap_err();
        assert_eq!(err.to_string(), "Choose at least 1 book.");
    }

    #[tokio::test]
    async fn test_extend_batch_fails_whole_when_one_capped() {
        let f = fixture().await;
        let fresh = f.store.add_book(Book::new("fresh", "x", 1)).await;
        let capped = f.store.add_book(Book::new("capped", "y", 1)).await;
        f.store
            .add_record(BorrowRecord::open(f.student.id, fresh.id, today(), Utc::now()))
            .await;
        let mut used = BorrowRecord::open(f.student.id, capped.id, today(), Utc::now());
        used.count_extend = 1;
        f.store.add_record(used).await;

        let err = f.service.extend_books("eko", Some(&ids(&[&fresh, &capped]))).await.unwrap_err();
        assert!(matches!(err, AppError::ExtendLimitReached { ref title, .. } if title == "capped"));

        let fresh_record = f
            .store
            .records()
            .await
            .into_iter()
            .find(|r| r.book_id == fresh.id)
            .unwrap();
        assert_eq!(fresh_record.count_extend, 0);
        assert_eq!(fresh_record.deadline_date, Some(today()));
    }

    #[tokio::test]
    async fn test_concurrent_borrows_of_last_copy() {
        let f = fixture().await;
        f.store.add_student(Student::new("ana", "Ana", "Lim")).await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 1)).await;
        let batch = ids(&[&book]);

        let first = {
            let service = f.service.clone();
            let batch = batch.clone();
            tokio::spawn(async move { service.borrow_books("eko", Some(&batch)).await })
        };
        let second = {
            let service = f.service.clone();
            let batch = batch.clone();
            tokio::spawn(async move { service.borrow_books("ana", Some(&batch)).await })
        };

        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(AppError::OutOfStock { .. }))));
        assert_eq!(f.store.book(book.uuid).await.unwrap().quantity, 0);
        assert_eq!(f.store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_borrows_of_same_book_by_one_student() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 3)).await;
        let batch = ids(&[&book]);

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let service = f.service.clone();
                let batch = batch.clone();
                tokio::spawn(async move { service.borrow_books("eko", Some(&batch)).await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(AppError::DuplicateLoan { .. }))));

        let open = f.store.records().await.into_iter().filter(|r| r.is_borrowed).count();
        assert_eq!(open, 1);
        assert_eq!(f.store.book(book.uuid).await.unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_out_of_range_deadline_is_an_error() {
        let config = BorrowConfig {
            deadline_days: 100_000_000_000,
            ..Default::default()
        };
        let f = fixture_with(config).await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 2)).await;

        let err = f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(f.store.records().await.is_empty());
        assert_eq!(f.store.book(book.uuid).await.unwrap().quantity, 2);

        f.store
            .add_record(BorrowRecord::open(f.student.id, book.id, today(), Utc::now()))
            .await;
        let err = f.service.extend_books("eko", Some(&ids(&[&book]))).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(f.store.records().await[0].count_extend, 0);
    }

    #[tokio::test]
    async fn test_held_loan_of_deleted_book_is_not_a_duplicate() {
        let f = fixture().await;
        let book = f.store.add_book(Book::new("language", "Chomsky", 2)).await;
        f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap();
        f.store.soft_delete_book(book.uuid, Utc::now()).await.unwrap();

        let err = f.service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap_err();
        assert_eq!(err.to_string(), "Choose at least 1 book.");
    }

    /// Store whose transactions fail when writing a book
    struct FailingBookWrites(MemoryLibraryStore);

    struct FailingTx(Box<dyn LibraryTx>);

    #[async_trait]
    impl LibraryStore for FailingBookWrites {
        async fn ping(&self) -> AppResult<()> {
            self.0.ping().await
        }
        async fn begin(&self) -> AppResult<Box<dyn LibraryTx>> {
            Ok(Box::new(FailingTx(self.0.begin().await?)))
        }
        async fn find_student(&self, username: &str) -> AppResult<Option<Student>> {
            self.0.find_student(username).await
        }
        async fn list_books(&self) -> AppResult<Vec<Book>> {
            self.0.list_books().await
        }
        async fn find_book(&self, uuid: Uuid) -> AppResult<Option<Book>> {
            self.0.find_book(uuid).await
        }
        async fn insert_book(&self, book: Book) -> AppResult<Book> {
            self.0.insert_book(book).await
        }
        async fn soft_delete_book(&self, uuid: Uuid, at: chrono::DateTime<Utc>) -> AppResult<bool> {
            self.0.soft_delete_book(uuid, at).await
        }
        async fn purge_book(&self, uuid: Uuid) -> AppResult<bool> {
            self.0.purge_book(uuid).await
        }
        async fn list_student_records(&self, student_id: i64, open_only: bool) -> AppResult<Vec<BorrowDetails>> {
            self.0.list_student_records(student_id, open_only).await
        }
    }

    #[async_trait]
    impl LibraryTx for FailingTx {
        async fn find_student(&mut self, username: &str) -> AppResult<Option<Student>> {
            self.0.find_student(username).await
        }
        async fn count_open_records(&mut self, student_id: i64) -> AppResult<i64> {
            self.0.count_open_records(student_id).await
        }
        async fn find_books(&mut self, ids: &[Uuid]) -> AppResult<Vec<Book>> {
            self.0.find_books(ids).await
        }
        async fn find_student_records(
            &mut self,
            student_id: i64,
            book_ids: &[Uuid],
            open_only: bool,
        ) -> AppResult<Vec<BorrowDetails>> {
            self.0.find_student_records(student_id, book_ids, open_only).await
        }
        async fn min_open_deadline(&mut self, book_id: i64) -> AppResult<Option<NaiveDate>> {
            self.0.min_open_deadline(book_id).await
        }
        async fn insert_records(&mut self, records: &[BorrowRecord]) -> AppResult<u64> {
            self.0.insert_records(records).await
        }
        async fn update_records(&mut self, records: &[BorrowRecord]) -> AppResult<u64> {
            self.0.update_records(records).await
        }
        async fn save_book(&mut self, _book: &Book) -> AppResult<()> {
            Err(AppError::Internal("disk full".into()))
        }
        async fn commit(self: Box<Self>) -> AppResult<()> {
            self.0.commit().await
        }
    }

    #[tokio::test]
    async fn test_write_failure_rolls_back_records() {
        let store = MemoryLibraryStore::new();
        store.add_student(Student::new("eko", "eko", "aziz")).await;
        let book = store.add_book(Book::new("language", "Chomsky", 1)).await;
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 8, 0, 0).unwrap());
        let service = BorrowService::new(
            Arc::new(FailingBookWrites(store.clone())),
            BorrowConfig::default(),
            Arc::new(clock),
        );

        let err = service.borrow_books("eko", Some(&ids(&[&book]))).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(store.records().await.is_empty());
        assert_eq!(store.book(book.uuid).await.unwrap().quantity, 1);
    }
}
