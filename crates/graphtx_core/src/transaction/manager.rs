//! Transaction manager.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::{
    ChangeFeed, CommitCoordinator, CommitReport, CommittedTransaction, HandlerRegistry,
    TransactionData,
};
use crate::graph::{GraphStore, RelationshipRecord};
use crate::transaction::state::Transaction;
use crate::types::{NodeId, RelationshipId, SequenceNumber, TransactionId};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Owns the committed graph and runs commits through the handler protocol.
///
/// ## Single-Writer Guarantee
///
/// Only one write transaction can be active at a time. [`begin_write`]
/// acquires an exclusive lock that is held for the transaction's lifetime.
/// Readers of the committed store are never blocked by an open transaction,
/// only by the short apply step of a commit.
///
/// [`begin_write`]: Self::begin_write
pub struct TransactionManager {
    store: RwLock<GraphStore>,
    registry: HandlerRegistry,
    coordinator: CommitCoordinator,
    feed: ChangeFeed,
    next_txid: AtomicU64,
    next_node_id: AtomicU64,
    next_relationship_id: AtomicU64,
    committed_seq: AtomicU64,
    /// Cleared once by [`shutdown`](Self::shutdown); commits check it.
    open: AtomicBool,
    /// Write lock - only one writer at a time.
    write_lock: Mutex<()>,
}

impl TransactionManager {
    /// Creates a manager with an empty store.
    pub fn new(config: &Config) -> Self {
        Self {
            store: RwLock::new(GraphStore::new()),
            registry: HandlerRegistry::new(),
            coordinator: CommitCoordinator::new(config),
            feed: ChangeFeed::with_max_history(config.max_feed_history),
            next_txid: AtomicU64::new(1),
            next_node_id: AtomicU64::new(1),
            next_relationship_id: AtomicU64::new(1),
            committed_seq: AtomicU64::new(0),
            open: AtomicBool::new(true),
            write_lock: Mutex::new(()),
        }
    }

    /// Begins a write transaction, blocking while another one is open.
    ///
    /// Do not call this from a thread that already holds a transaction of
    /// the same database, including from inside a handler callback.
    pub fn begin_write(&self) -> Transaction<'_> {
        let guard = self.write_lock.lock();
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        tracing::trace!(%txid, "transaction started");
        Transaction::new(self, guard, txid)
    }

    /// Returns the handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Returns the change feed.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Read access to the committed store.
    pub fn store(&self) -> RwLockReadGuard<'_, GraphStore> {
        self.store.read()
    }

    /// Returns the sequence number of the latest commit.
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    /// Returns false once the manager has been shut down.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    pub(crate) fn allocate_node_id(&self) -> NodeId {
        NodeId::new(self.next_node_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn allocate_relationship_id(&self) -> RelationshipId {
        RelationshipId::new(self.next_relationship_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Runs the commit protocol and, if every handler accepts, writes the
    /// changes and publishes them.
    ///
    /// The caller must hold the write lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] without calling any handler if
    /// the manager was shut down while the transaction was open. A shutdown
    /// during before-commit fails the apply step, so handlers that completed
    /// are told about the rollback.
    pub(crate) fn commit_inner(
        &self,
        data: TransactionData,
        pending: HashMap<RelationshipId, RelationshipRecord>,
    ) -> CoreResult<CommitReport> {
        self.ensure_open()?;
        let handlers = self.registry.snapshot();
        let data = Arc::new(data);

        let (report, sequence) = self.coordinator.attempt_with(&handlers, &data, || {
            let mut store = self.store.write();
            self.ensure_open()?;
            store.commit(&data, pending)?;
            // Writers are serialized, so load-then-store cannot race.
            let sequence = self.committed_seq().next();
            self.committed_seq.store(sequence.as_u64(), Ordering::SeqCst);
            Ok(sequence)
        })?;

        tracing::debug!(
            txid = %data.transaction_id(),
            %sequence,
            changes = data.change_count(),
            "transaction committed"
        );
        self.feed.emit(CommittedTransaction { sequence, data });
        Ok(report)
    }

    /// Refuses further commits and drops registered handlers and feed
    /// subscribers. Returns false if the manager was already shut down.
    ///
    /// Does not wait for an open transaction; its commit will fail with
    /// [`CoreError::DatabaseClosed`].
    pub(crate) fn shutdown(&self) -> bool {
        let was_open = {
            // Taken so no apply step is half-way through when the flag flips.
            let _store = self.store.write();
            self.open.swap(false, Ordering::SeqCst)
        };
        if was_open {
            self.registry.clear();
            self.feed.close();
        }
        was_open
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("open", &self.is_open())
            .field("committed_seq", &self.committed_seq())
            .field("handlers", &self.registry.len())
            .finish_non_exhaustive()
    }
}
