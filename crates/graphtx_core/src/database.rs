//! Database facade.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::{CommittedTransaction, TransactionEventHandler};
use crate::transaction::{Transaction, TransactionManager};
use crate::types::{EntityRef, NodeId, RelationshipId, SequenceNumber};
use crate::value::PropertyValue;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// The main database handle.
///
/// `Database` is the primary entry point for graphtx. It provides:
/// - Write transactions over an in-memory property graph
/// - Registration of transaction event handlers
/// - Read access to committed state
/// - A change feed of committed transactions
///
/// Each database owns its own handler registry; handlers registered on one
/// database never observe another.
///
/// # Example
///
/// ```rust,ignore
/// use graphtx_core::Database;
///
/// let db = Database::open()?;
/// db.register_handler(Arc::new(AuditLog::default()))?;
///
/// let alice = db.transaction(|tx| {
///     let alice = tx.create_node()?;
///     tx.set_property(alice, "name", "Alice")?;
///     Ok(alice)
/// })?;
///
/// db.close()?;
/// ```
pub struct Database {
    /// Configuration.
    config: Config,
    /// Store, registry, feed, commit machinery and the open flag.
    txn_manager: TransactionManager,
}

impl Database {
    /// Opens an empty database with the default configuration.
    pub fn open() -> CoreResult<Self> {
        Self::open_with_config(Config::default())
    }

    /// Opens an empty database with a custom configuration.
    pub fn open_with_config(config: Config) -> CoreResult<Self> {
        tracing::debug!(
            catch_handler_panics = config.catch_handler_panics,
            max_feed_history = config.max_feed_history,
            "opening database"
        );
        Ok(Self {
            txn_manager: TransactionManager::new(&config),
            config,
        })
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Registers a handler and returns the same reference.
    ///
    /// Registering an instance that is already registered changes nothing.
    /// Membership is by instance, so two equal handler values are two
    /// registrations.
    pub fn register_handler<H>(&self, handler: Arc<H>) -> CoreResult<Arc<H>>
    where
        H: TransactionEventHandler,
    {
        self.ensure_open()?;
        Ok(self.txn_manager.registry().register(handler))
    }

    /// Unregisters a handler and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HandlerNotRegistered`] if this instance is not
    /// registered.
    pub fn unregister_handler<H>(&self, handler: &Arc<H>) -> CoreResult<Arc<H>>
    where
        H: TransactionEventHandler,
    {
        self.ensure_open()?;
        self.txn_manager.registry().unregister(handler)
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.txn_manager.registry().len()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins a write transaction.
    ///
    /// Blocks while another write transaction is open. Must not be called
    /// from a handler callback.
    pub fn begin(&self) -> CoreResult<Transaction<'_>> {
        self.ensure_open()?;
        Ok(self.txn_manager.begin_write())
    }

    /// Executes a function within a transaction.
    ///
    /// Commits if `f` returns `Ok` and the transaction is still active,
    /// rolls back if it returns `Err`.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                if txn.is_active() {
                    txn.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                if txn.is_active() {
                    txn.rollback()?;
                }
                Err(err)
            }
        }
    }

    // ========================================================================
    // Committed state
    // ========================================================================

    /// Returns true if the node is committed.
    pub fn node_exists(&self, id: NodeId) -> CoreResult<bool> {
        self.ensure_open()?;
        Ok(self.txn_manager.store().contains_node(id))
    }

    /// Returns true if the relationship is committed.
    pub fn relationship_exists(&self, id: RelationshipId) -> CoreResult<bool> {
        self.ensure_open()?;
        Ok(self.txn_manager.store().contains_relationship(id))
    }

    /// Reads a committed property.
    pub fn property(
        &self,
        entity: impl Into<EntityRef>,
        key: &str,
    ) -> CoreResult<Option<PropertyValue>> {
        self.ensure_open()?;
        Ok(self
            .txn_manager
            .store()
            .get_property(entity.into(), key)
            .cloned())
    }

    /// Returns the number of committed nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.txn_manager.store().node_count()
    }

    /// Returns the number of committed relationships.
    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.txn_manager.store().relationship_count()
    }

    /// Returns the current committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.txn_manager.committed_seq()
    }

    // ========================================================================
    // Change feed
    // ========================================================================

    /// Subscribes to future commits.
    pub fn subscribe(&self) -> CoreResult<Receiver<CommittedTransaction>> {
        self.ensure_open()?;
        Ok(self.txn_manager.feed().subscribe())
    }

    /// Returns up to `limit` commits with a sequence after `cursor`.
    pub fn poll_changes(
        &self,
        cursor: SequenceNumber,
        limit: usize,
    ) -> CoreResult<Vec<CommittedTransaction>> {
        self.ensure_open()?;
        Ok(self.txn_manager.feed().poll(cursor, limit))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Closes the database.
    ///
    /// Unregisters every handler and disconnects feed subscribers. A write
    /// transaction still open at this point can no longer commit; its
    /// `commit` fails with [`CoreError::DatabaseClosed`]. Closing twice is
    /// harmless.
    pub fn close(&self) -> CoreResult<()> {
        if self.txn_manager.shutdown() {
            tracing::debug!(committed_seq = %self.committed_seq(), "database closed");
        }
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.txn_manager.is_open()
    }

    /// Ensures the database is open.
    fn ensure_open(&self) -> CoreResult<()> {
        if self.txn_manager.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("handlers", &self.handler_count())
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
