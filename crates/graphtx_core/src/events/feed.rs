//! Change feed of committed transactions.
//!
//! Every successful commit is published here after its after-commit
//! handlers ran. Vetoed and rolled-back attempts never appear.
//!
//! # Usage
//!
//! ```rust,ignore
//! use graphtx_core::Database;
//!
//! let db = Database::open()?;
//! let receiver = db.subscribe()?;
//!
//! std::thread::spawn(move || {
//!     while let Ok(committed) = receiver.recv() {
//!         println!("{}: {} changes", committed.sequence, committed.data.change_count());
//!     }
//! });
//! ```

use crate::events::data::TransactionData;
use crate::types::SequenceNumber;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// A committed transaction as published on the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedTransaction {
    /// Commit sequence number.
    pub sequence: SequenceNumber,
    /// The same data the handlers saw.
    pub data: Arc<TransactionData>,
}

/// Fans committed transactions out to `mpsc` subscribers and keeps the most
/// recent ones for cursor-based polling.
///
/// Entries arrive in sequence order because commits are serialized by the
/// transaction manager's write lock.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<CommittedTransaction>>>,
    history: RwLock<VecDeque<CommittedTransaction>>,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a feed that retains at most `max_history` commits.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history,
        }
    }

    /// Returns a receiver for every commit published from now on.
    ///
    /// The channel is unbounded, so a receiver nobody drains keeps growing.
    pub fn subscribe(&self) -> Receiver<CommittedTransaction> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Records `committed` and sends it to every live subscriber.
    pub fn emit(&self, committed: CommittedTransaction) {
        if self.max_history > 0 {
            let mut history = self.history.write();
            while history.len() >= self.max_history {
                history.pop_front();
            }
            history.push_back(committed.clone());
        }

        // A failed send means the receiver is gone.
        self.subscribers
            .write()
            .retain(|tx| tx.send(committed.clone()).is_ok());
    }

    /// Returns retained commits after `cursor`, oldest first, at most
    /// `limit` of them.
    pub fn poll(&self, cursor: SequenceNumber, limit: usize) -> Vec<CommittedTransaction> {
        let history = self.history.read();
        let start = history.partition_point(|c| c.sequence <= cursor);
        history.range(start..).take(limit).cloned().collect()
    }

    /// Returns the sequence of the newest retained commit, or zero.
    pub fn latest_sequence(&self) -> SequenceNumber {
        self.history
            .read()
            .back()
            .map_or(SequenceNumber::new(0), |c| c.sequence)
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of retained commits.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// Disconnects every subscriber. History stays pollable.
    pub fn close(&self) {
        self.subscribers.write().clear();
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_max_history(10_000)
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history_len())
            .field("max_history", &self.max_history)
            .finish()
    }
}
