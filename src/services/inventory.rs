//! Inventory ledger: book quantities and nearest return dates
//!
//! No validation happens here; callers check stock before borrowing. Every
//! change is written through the caller's transaction.

use crate::{
    config::NearestReturnPolicy,
    error::{AppError, AppResult},
    models::Book,
    repository::LibraryTx,
};

#[derive(Debug, Clone, Copy)]
pub struct InventoryLedger {
    policy: NearestReturnPolicy,
}

impl InventoryLedger {
    pub fn new(policy: NearestReturnPolicy) -> Self {
        Self { policy }
    }

    pub fn decrement(book: &mut Book) -> AppResult<()> {
        if book.quantity < 1 {
            return Err(AppError::Internal(format!(
                "book {} has no copy left to lend",
                book.uuid
            )));
        }
        book.quantity -= 1;
        Ok(())
    }

    pub fn increment(book: &mut Book) {
        book.quantity += 1;
    }

    /// Earliest deadline among the book's open records, or none
    pub async fn recompute_nearest_return_date(tx: &mut dyn LibraryTx, book: &mut Book) -> AppResult<()> {
        book.nearest_return_date = tx.min_open_deadline(book.id).await?;
        Ok(())
    }

    /// Take one copy off the shelf. Must run after the new record is inserted so the
    /// recompute sees it alongside any older open loans.
    pub async fn record_borrowed(&self, tx: &mut dyn LibraryTx, book: &mut Book) -> AppResult<()> {
        Self::decrement(book)?;
        if book.quantity == 0 {
            Self::recompute_nearest_return_date(tx, book).await?;
        }
        tx.save_book(book).await
    }

    /// Put one copy back. Must run after the record is closed.
    pub async fn record_returned(&self, tx: &mut dyn LibraryTx, book: &mut Book) -> AppResult<()> {
        let was_empty = book.quantity == 0;
        Self::increment(book);
        if was_empty {
            match self.policy {
                NearestReturnPolicy::Clear => book.nearest_return_date = None,
                NearestReturnPolicy::Recompute => Self::recompute_nearest_return_date(tx, book).await?,
            }
        }
        tx.save_book(book).await
    }
}
