//! Minimal in-memory graph storage.

mod store;

pub use store::{GraphStore, NodeRecord, RelationshipRecord};
