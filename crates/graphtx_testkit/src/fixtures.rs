//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use graphtx_core::{Config, Database};
use tracing_subscriber::EnvFilter;

/// A test database that is closed when dropped.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
}

impl TestDatabase {
    /// Creates a database with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a database with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        init_tracing();
        Self {
            db: Database::open_with_config(config).expect("Failed to open database"),
        }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a fresh database.
///
/// # Example
///
/// ```rust,ignore
/// use graphtx_testkit::with_test_db;
///
/// #[test]
/// fn my_test() {
///     with_test_db(|db| {
///         let node = db.transaction(|tx| tx.create_node()).unwrap();
///         assert!(db.node_exists(node).unwrap());
///     });
/// }
/// ```
pub fn with_test_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::new();
    f(&test_db.db)
}

/// Installs a `tracing` subscriber that writes to the test output.
///
/// Filtering follows `RUST_LOG`. Safe to call from every test; only the
/// first call in a process installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test scenario helpers.
pub mod scenarios {
    use graphtx_core::{Database, NodeId, RelationshipId};

    /// Two committed nodes joined by a `KNOWS` relationship.
    #[derive(Debug, Clone, Copy)]
    pub struct LinkedPair {
        /// Start node, with `name = "a"`.
        pub a: NodeId,
        /// End node, with `name = "b"`.
        pub b: NodeId,
        /// Relationship from `a` to `b`, with `since = 2020`.
        pub rel: RelationshipId,
    }

    /// Commits a [`LinkedPair`].
    pub fn linked_pair(db: &Database) -> LinkedPair {
        db.transaction(|tx| {
            let a = tx.create_node()?;
            let b = tx.create_node()?;
            let rel = tx.create_relationship(a, b, "KNOWS")?;
            tx.set_property(a, "name", "a")?;
            tx.set_property(b, "name", "b")?;
            tx.set_property(rel, "since", 2020)?;
            Ok(LinkedPair { a, b, rel })
        })
        .expect("Failed to commit linked pair")
    }

    /// Commits `count` nodes, each with an `index` property.
    pub fn populated_graph(db: &Database, count: usize) -> Vec<NodeId> {
        db.transaction(|tx| {
            let mut nodes = Vec::with_capacity(count);
            for i in 0..count {
                let node = tx.create_node()?;
                tx.set_property(node, "index", i as i64)?;
                nodes.push(node);
            }
            Ok(nodes)
        })
        .expect("Failed to populate graph")
    }
}
