//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::events::{ChangeTracker, CommitReport};
use crate::graph::{GraphStore, RelationshipRecord};
use crate::transaction::manager::TransactionManager;
use crate::types::{EntityRef, NodeId, RelationshipId, TransactionId};
use crate::value::PropertyValue;
use parking_lot::MutexGuard;
use std::collections::HashMap;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// A write transaction.
///
/// Holds the database's write lock until it is committed, rolled back or
/// dropped. Reads through the transaction see its own uncommitted changes;
/// reads through the database see committed state only.
///
/// Dropping an active transaction rolls it back. Handlers only hear about a
/// rollback when it happens during a commit attempt.
pub struct Transaction<'db> {
    manager: &'db TransactionManager,
    write_guard: Option<MutexGuard<'db, ()>>,
    id: TransactionId,
    state: TransactionState,
    failure: Option<String>,
    tracker: ChangeTracker,
    /// Endpoints and types of relationships created here.
    pending: HashMap<RelationshipId, RelationshipRecord>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(
        manager: &'db TransactionManager,
        write_guard: MutexGuard<'db, ()>,
        id: TransactionId,
    ) -> Self {
        Self {
            manager,
            write_guard: Some(write_guard),
            id,
            state: TransactionState::Active,
            failure: None,
            tracker: ChangeTracker::new(),
            pending: HashMap::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns true if [`mark_failed`](Self::mark_failed) was called.
    #[must_use]
    pub fn is_marked_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Returns the changes recorded so far.
    #[must_use]
    pub fn changes(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Creates a node.
    pub fn create_node(&mut self) -> CoreResult<NodeId> {
        self.ensure_active()?;
        let id = self.manager.allocate_node_id();
        self.tracker.record_node_created(id);
        Ok(id)
    }

    /// Creates a relationship of `rel_type` from `start` to `end`.
    pub fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
    ) -> CoreResult<RelationshipId> {
        self.ensure_active()?;
        {
            let store = self.manager.store();
            self.ensure_node(&store, start)?;
            self.ensure_node(&store, end)?;
        }
        let id = self.manager.allocate_relationship_id();
        self.tracker.record_relationship_created(id);
        self.pending
            .insert(id, RelationshipRecord::new(start, end, rel_type));
        Ok(id)
    }

    /// Deletes a node.
    ///
    /// Relationships attached to the node must be deleted in the same
    /// transaction, otherwise the commit fails with
    /// [`CoreError::ConstraintViolation`].
    pub fn delete_node(&mut self, id: NodeId) -> CoreResult<()> {
        self.ensure_active()?;
        let manager = self.manager;
        let store = manager.store();
        self.ensure_node(&store, id)?;
        self.tracker.record_node_deleted(&*store, id);
        Ok(())
    }

    /// Deletes a relationship.
    pub fn delete_relationship(&mut self, id: RelationshipId) -> CoreResult<()> {
        self.ensure_active()?;
        let manager = self.manager;
        let store = manager.store();
        self.ensure_relationship(&store, id)?;
        self.tracker.record_relationship_deleted(&*store, id);
        self.pending.remove(&id);
        Ok(())
    }

    /// Sets a property on a node or relationship.
    pub fn set_property(
        &mut self,
        entity: impl Into<EntityRef>,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        let entity = entity.into();
        let manager = self.manager;
        let store = manager.store();
        self.ensure_entity(&store, entity)?;
        self.tracker
            .record_property_set(&*store, entity, key, value.into());
        Ok(())
    }

    /// Removes a property. Removing a missing key is not an error.
    pub fn remove_property(&mut self, entity: impl Into<EntityRef>, key: &str) -> CoreResult<()> {
        self.ensure_active()?;
        let entity = entity.into();
        let manager = self.manager;
        let store = manager.store();
        self.ensure_entity(&store, entity)?;
        self.tracker.record_property_removed(&*store, entity, key);
        Ok(())
    }

    /// Reads a property as this transaction sees it.
    pub fn property(
        &self,
        entity: impl Into<EntityRef>,
        key: &str,
    ) -> CoreResult<Option<PropertyValue>> {
        self.ensure_active()?;
        let entity = entity.into();
        let store = self.manager.store();
        self.ensure_entity(&store, entity)?;
        Ok(match self.tracker.current_property(entity, key) {
            Some(current) => current.cloned(),
            None => store.get_property(entity, key).cloned(),
        })
    }

    /// Returns true if the node exists as this transaction sees it.
    #[must_use]
    pub fn node_exists(&self, id: NodeId) -> bool {
        self.node_alive(&self.manager.store(), id)
    }

    /// Returns true if the relationship exists as this transaction sees it.
    #[must_use]
    pub fn relationship_exists(&self, id: RelationshipId) -> bool {
        self.relationship_alive(&self.manager.store(), id)
    }

    /// Marks the transaction so that committing it rolls back instead.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(reason.into());
        }
    }

    /// Commits the transaction.
    ///
    /// Registered handlers inspect the changes first; any of them can veto.
    /// On success the returned report lists after-commit failures, which do
    /// not undo the commit.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TransactionAborted`] if the transaction was marked
    ///   failed. No handler is called.
    /// - [`CoreError::TransactionVetoed`] if a handler rejected the changes.
    /// - [`CoreError::ConstraintViolation`] if the changes would leave a
    ///   relationship without an endpoint.
    /// - [`CoreError::InvalidOperation`] if the transaction already ended.
    ///
    /// In every error case except the last the transaction is rolled back.
    /// The write lock is released once the transaction has ended.
    pub fn commit(&mut self) -> CoreResult<CommitReport> {
        self.ensure_active()?;
        if let Some(reason) = self.failure.clone() {
            self.finish(TransactionState::Aborted);
            tracing::debug!(txid = %self.id, %reason, "transaction marked failed, rolled back");
            return Err(CoreError::transaction_aborted(reason));
        }

        let data = self.tracker.snapshot(self.id);
        let pending = std::mem::take(&mut self.pending);
        let result = self.manager.commit_inner(data, pending);
        match &result {
            Ok(_) => self.finish(TransactionState::Committed),
            Err(err) => {
                tracing::debug!(txid = %self.id, error = %err, "transaction rolled back");
                self.finish(TransactionState::Aborted);
            }
        }
        result
    }

    /// Discards every change. No handler is called.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the transaction already
    /// ended.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        tracing::trace!(txid = %self.id, "transaction rolled back");
        self.finish(TransactionState::Aborted);
        Ok(())
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.tracker = ChangeTracker::new();
        self.pending.clear();
        self.write_guard = None;
    }

    fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::Aborted => {
                Err(CoreError::invalid_operation("transaction already aborted"))
            }
        }
    }

    fn node_alive(&self, store: &GraphStore, id: NodeId) -> bool {
        self.tracker.is_created_node(id)
            || (store.contains_node(id) && !self.tracker.is_deleted_node(id))
    }

    fn relationship_alive(&self, store: &GraphStore, id: RelationshipId) -> bool {
        self.tracker.is_created_relationship(id)
            || (store.contains_relationship(id) && !self.tracker.is_deleted_relationship(id))
    }

    fn ensure_node(&self, store: &GraphStore, id: NodeId) -> CoreResult<()> {
        if self.node_alive(store, id) {
            Ok(())
        } else {
            Err(CoreError::NodeNotFound { id })
        }
    }

    fn ensure_relationship(&self, store: &GraphStore, id: RelationshipId) -> CoreResult<()> {
        if self.relationship_alive(store, id) {
            Ok(())
        } else {
            Err(CoreError::RelationshipNotFound { id })
        }
    }

    fn ensure_entity(&self, store: &GraphStore, entity: EntityRef) -> CoreResult<()> {
        match entity {
            EntityRef::Node(id) => self.ensure_node(store, id),
            EntityRef::Relationship(id) => self.ensure_relationship(store, id),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::trace!(txid = %self.id, "transaction dropped, rolled back");
            self.finish(TransactionState::Aborted);
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn manager() -> TransactionManager {
        TransactionManager::new(&Config::default())
    }

    #[test]
    fn new_transaction_is_active() {
        let tm = manager();
        let txn = tm.begin_write();
        assert!(txn.is_active());
        assert_eq!(txn.state(), TransactionState::Active);
        assert!(!txn.is_marked_failed());
    }

    #[test]
    fn reads_see_own_writes() {
        let tm = manager();
        let mut txn = tm.begin_write();
        let a = txn.create_node().unwrap();
        txn.set_property(a, "name", "alice").unwrap();

        assert!(txn.node_exists(a));
        assert_eq!(
            txn.property(a, "name").unwrap(),
            Some(PropertyValue::from("alice"))
        );
        assert!(!tm.store().contains_node(a));
    }

    #[test]
    fn commit_makes_changes_visible() {
        let tm = manager();
        let mut txn = tm.begin_write();
        let a = txn.create_node().unwrap();
        let b = txn.create_node().unwrap();
        let r = txn.create_relationship(a, b, "KNOWS").unwrap();
        txn.set_property(r, "since", 2020).unwrap();
        txn.commit().unwrap();

        let store = tm.store();
        assert!(store.contains_node(a));
        assert_eq!(store.relationship(r).map(|rel| rel.start), Some(a));
        assert_eq!(
            store.get_property(r.into(), "since"),
            Some(&PropertyValue::Integer(2020))
        );
        assert_eq!(tm.committed_seq().as_u64(), 1);
    }

    #[test]
    fn unknown_entities_rejected() {
        let tm = manager();
        let mut txn = tm.begin_write();
        let missing = NodeId::new(99);

        assert!(matches!(
            txn.set_property(missing, "k", 1),
            Err(CoreError::NodeNotFound { .. })
        ));
        assert!(matches!(
            txn.delete_relationship(RelationshipId::new(7)),
            Err(CoreError::RelationshipNotFound { .. })
        ));
        let a = txn.create_node().unwrap();
        assert!(matches!(
            txn.create_relationship(a, missing, "KNOWS"),
            Err(CoreError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn deleted_node_is_gone_within_transaction() {
        let tm = manager();
        let mut txn = tm.begin_write();
        let a = txn.create_node().unwrap();
        txn.delete_node(a).unwrap();

        assert!(!txn.node_exists(a));
        assert!(matches!(
            txn.property(a, "k"),
            Err(CoreError::NodeNotFound { .. })
        ));
        assert!(txn.changes().snapshot(txn.id()).is_empty());
    }

    #[test]
    fn marked_failed_commit_aborts() {
        let tm = manager();
        let mut txn = tm.begin_write();
        let a = txn.create_node().unwrap();
        txn.mark_failed("caller gave up");

        let err = txn.commit().unwrap_err();
        assert!(matches!(err, CoreError::TransactionAborted { .. }));
        assert!(!tm.store().contains_node(a));
        assert_eq!(tm.committed_seq().as_u64(), 0);
    }

    #[test]
    fn rollback_discards_changes() {
        let tm = manager();
        let mut txn = tm.begin_write();
        let a = txn.create_node().unwrap();
        txn.rollback().unwrap();

        assert!(!tm.store().contains_node(a));
    }

    #[test]
    fn operations_after_end_are_invalid() {
        let tm = manager();
        let mut txn = tm.begin_write();
        txn.create_node().unwrap();
        txn.commit().unwrap();

        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(matches!(
            txn.create_node(),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(txn.commit(), Err(CoreError::InvalidOperation { .. })));
        assert!(matches!(txn.rollback(), Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn commit_releases_write_lock() {
        let tm = manager();
        let mut first = tm.begin_write();
        first.commit().unwrap();

        let second = tm.begin_write();
        assert!(second.is_active());
        assert!(first.id() < second.id());
    }

    #[test]
    fn drop_releases_write_lock() {
        let tm = manager();
        {
            let mut txn = tm.begin_write();
            txn.create_node().unwrap();
        }
        let txn = tm.begin_write();
        assert!(txn.is_active());
        assert_eq!(tm.store().node_count(), 0);
    }

    #[test]
    fn constraint_failure_rolls_back() {
        let tm = manager();
        let (a, b) = {
            let mut txn = tm.begin_write();
            let a = txn.create_node().unwrap();
            let b = txn.create_node().unwrap();
            txn.create_relationship(a, b, "KNOWS").unwrap();
            txn.commit().unwrap();
            (a, b)
        };

        let mut txn = tm.begin_write();
        txn.delete_node(a).unwrap();
        let err = txn.commit().unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));

        let store = tm.store();
        assert!(store.contains_node(a));
        assert!(store.contains_node(b));
        assert_eq!(tm.committed_seq().as_u64(), 1);
    }

    #[test]
    fn commit_after_shutdown_fails() {
        let tm = manager();
        let mut txn = tm.begin_write();
        txn.create_node().unwrap();

        assert!(tm.shutdown());
        assert!(!tm.shutdown());

        assert!(matches!(txn.commit(), Err(CoreError::DatabaseClosed)));
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(tm.store().node_count(), 0);
        assert_eq!(tm.committed_seq().as_u64(), 0);
    }
}
