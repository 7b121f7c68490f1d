//! Business logic services

pub mod borrows;
pub mod catalog;
pub mod inventory;

use std::sync::Arc;

use crate::{clock::Clock, config::BorrowConfig, repository::LibraryStore};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub borrows: borrows::BorrowService,
    pub catalog: catalog::CatalogService,
}

impl Services {
    /// Create all services over the given store
    pub fn new(store: Arc<dyn LibraryStore>, borrow_config: BorrowConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            borrows: borrows::BorrowService::new(store.clone(), borrow_config, clock.clone()),
            catalog: catalog::CatalogService::new(store, clock),
        }
    }
}
