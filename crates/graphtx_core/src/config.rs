//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether panics raised by handler callbacks are contained.
    ///
    /// When set, a panic in before-commit vetoes the transaction and a panic
    /// in after-commit or after-rollback is reported as a notification error.
    /// When cleared, the panic unwinds through the committing thread.
    pub catch_handler_panics: bool,

    /// Maximum number of committed transactions kept in the change feed
    /// history for polling.
    pub max_feed_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catch_handler_panics: true,
            max_feed_history: 10_000,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether handler panics are contained.
    #[must_use]
    pub const fn catch_handler_panics(mut self, value: bool) -> Self {
        self.catch_handler_panics = value;
        self
    }

    /// Sets the change feed history limit.
    #[must_use]
    pub const fn max_feed_history(mut self, value: usize) -> Self {
        self.max_feed_history = value;
        self
    }
}
