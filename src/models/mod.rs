//! Data models for the school library

pub mod book;
pub mod borrow;
pub mod student;

// Re-export commonly used types
pub use book::{Book, CreateBook};
pub use borrow::{BorrowAction, BorrowDetails, BorrowEntry, BorrowRecord, BorrowSummary};
pub use student::Student;
