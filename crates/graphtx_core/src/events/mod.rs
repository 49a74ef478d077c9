//! Transaction events: change tracking, handler registry, commit protocol.
//!
//! A transaction feeds its mutations into a [`ChangeTracker`]. At commit the
//! tracker's [`TransactionData`] snapshot and the [`HandlerRegistry`]'s
//! current handler list are handed to the [`CommitCoordinator`], whose
//! outcome decides whether the changes reach the store. Committed data is
//! then published on the [`ChangeFeed`].

mod coordinator;
mod data;
mod feed;
mod handler;
mod registry;
mod tracker;

pub use coordinator::{CommitCoordinator, CommitPhase, CommitReport};
pub use data::{PropertyAssignment, PropertyRemoval, TransactionData};
pub use feed::{ChangeFeed, CommittedTransaction};
pub use handler::TransactionEventHandler;
pub use registry::{HandlerRegistry, RegisteredHandler};
pub use tracker::{ChangeTracker, CommittedState};
