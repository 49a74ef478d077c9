//! Error types for graphtx core.

use crate::events::CommitPhase;
use crate::types::{NodeId, RelationshipId};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in graphtx core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A handler's before-commit callback rejected the transaction.
    #[error("transaction vetoed by handler {handler}: {source}")]
    TransactionVetoed {
        /// Name of the vetoing handler.
        handler: String,
        /// The cause supplied by the handler.
        #[source]
        source: HandlerError,
    },

    /// Attempted to unregister a handler that is not registered.
    #[error("handler not registered: {handler}")]
    HandlerNotRegistered {
        /// Name of the handler.
        handler: String,
    },

    /// Node does not exist (or was deleted in this transaction).
    #[error("node not found: {id}")]
    NodeNotFound {
        /// The missing node.
        id: NodeId,
    },

    /// Relationship does not exist (or was deleted in this transaction).
    #[error("relationship not found: {id}")]
    RelationshipNotFound {
        /// The missing relationship.
        id: RelationshipId,
    },

    /// The transaction's net changes would leave the graph inconsistent.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violation.
        message: String,
    },

    /// Transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a transaction vetoed error.
    pub fn transaction_vetoed(handler: impl Into<String>, source: HandlerError) -> Self {
        Self::TransactionVetoed {
            handler: handler.into(),
            source,
        }
    }

    /// Creates a handler not registered error.
    pub fn handler_not_registered(handler: impl Into<String>) -> Self {
        Self::HandlerNotRegistered {
            handler: handler.into(),
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if a handler vetoed the transaction.
    #[must_use]
    pub fn is_veto(&self) -> bool {
        matches!(self, Self::TransactionVetoed { .. })
    }
}

/// Error returned by a transaction event handler callback.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Plain failure message.
    #[error("{0}")]
    Message(String),

    /// The callback panicked and the panic was contained.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// Any other error raised by the handler.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Creates a handler error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Wraps an arbitrary error raised by a handler.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }
}

/// A failed after-commit or after-rollback notification.
///
/// These never change the outcome of a commit; they are logged and reported
/// in the [`CommitReport`](crate::CommitReport).
#[derive(Debug, Error)]
#[error("{phase:?} notification to handler {handler} failed: {source}")]
pub struct NotificationError {
    /// Name of the handler that failed.
    pub handler: String,
    /// Phase whose notification failed.
    pub phase: CommitPhase,
    /// The handler's error.
    #[source]
    pub source: HandlerError,
}
