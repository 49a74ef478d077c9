//! Write transactions.
//!
//! graphtx runs one write transaction at a time. A transaction records its
//! mutations in a change tracker; on commit the collapsed changes go through
//! the registered handlers and, if none objects, into the store.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{Transaction, TransactionState};
