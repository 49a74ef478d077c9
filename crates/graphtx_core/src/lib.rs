//! # graphtx Core
//!
//! Transaction event notification core for the graphtx embedded graph
//! database.
//!
//! This crate provides:
//! - Change tracking that collapses a transaction's mutations into a net diff
//! - A database-scoped registry of transaction event handlers
//! - The before-commit / after-commit / after-rollback dispatch protocol
//! - A minimal in-memory graph store and transaction facade driving it
//! - A change feed of committed transactions

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod error;
mod events;
mod graph;
mod transaction;
mod types;
mod value;

pub use config::Config;
pub use database::Database;
pub use error::{CoreError, CoreResult, HandlerError, NotificationError};
pub use events::{
    ChangeFeed, ChangeTracker, CommitCoordinator, CommitPhase, CommitReport,
    CommittedState, CommittedTransaction, HandlerRegistry, PropertyAssignment,
    PropertyRemoval, RegisteredHandler, TransactionData, TransactionEventHandler,
};
pub use graph::{GraphStore, NodeRecord, RelationshipRecord};
pub use transaction::{Transaction, TransactionState};
pub use types::{EntityRef, NodeId, RelationshipId, SequenceNumber, TransactionId};
pub use value::PropertyValue;
