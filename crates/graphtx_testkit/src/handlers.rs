//! Transaction event handler doubles.
//!
//! - [`RecordingHandler`] records every callback with a tick from a
//!   [`CallClock`] that can be shared across handlers, so tests can assert
//!   both counts and relative order.
//! - [`FailingHandler`] forwards `before_commit` to a wrapped handler and
//!   then vetoes.
//! - [`PanickingHandler`] panics in one chosen callback.
//! - [`VerifyingHandler`] compares the data it receives with an
//!   [`ExpectedTransactionData`].

use graphtx_core::{
    EntityRef, HandlerError, NodeId, PropertyValue, RelationshipId, TransactionData,
    TransactionEventHandler,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A handler callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callback {
    /// `before_commit`.
    BeforeCommit,
    /// `after_commit`.
    AfterCommit,
    /// `after_rollback`.
    AfterRollback,
}

/// Monotonic tick source shared by handlers that need a common call order.
#[derive(Debug, Clone, Default)]
pub struct CallClock(Arc<AtomicUsize>);

impl CallClock {
    /// Creates a clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock and returns the new tick (the first tick is 1).
    pub fn tick(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Resets the clock to zero.
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// Records every callback it receives.
///
/// `before_commit` returns a clone of the configured state; the state handed
/// back to the after-phase callback is kept for inspection.
pub struct RecordingHandler<T = i64> {
    name: String,
    state: T,
    clock: CallClock,
    calls: Mutex<Vec<(Callback, usize)>>,
    received_state: Mutex<Option<T>>,
    received_data: Mutex<Option<TransactionData>>,
}

impl<T> RecordingHandler<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a handler with its own clock.
    pub fn new(name: impl Into<String>, state: T) -> Self {
        Self::with_clock(name, state, &CallClock::new())
    }

    /// Creates a handler ticking the given clock.
    pub fn with_clock(name: impl Into<String>, state: T, clock: &CallClock) -> Self {
        Self {
            name: name.into(),
            state,
            clock: clock.clone(),
            calls: Mutex::new(Vec::new()),
            received_state: Mutex::new(None),
            received_data: Mutex::new(None),
        }
    }

    /// Creates a handler ready for registration.
    pub fn shared(name: impl Into<String>, state: T) -> Arc<Self> {
        Arc::new(Self::new(name, state))
    }

    /// All calls so far, with their ticks.
    pub fn calls(&self) -> Vec<(Callback, usize)> {
        self.calls.lock().clone()
    }

    /// The callbacks received so far, in order.
    pub fn callbacks(&self) -> Vec<Callback> {
        self.calls.lock().iter().map(|(cb, _)| *cb).collect()
    }

    /// Number of times `callback` was received.
    pub fn count(&self, callback: Callback) -> usize {
        self.calls.lock().iter().filter(|(cb, _)| *cb == callback).count()
    }

    /// Tick of the first `callback`, if received.
    pub fn tick_of(&self, callback: Callback) -> Option<usize> {
        self.calls
            .lock()
            .iter()
            .find(|(cb, _)| *cb == callback)
            .map(|(_, tick)| *tick)
    }

    /// State received by the last after-phase callback.
    pub fn received_state(&self) -> Option<T> {
        self.received_state.lock().clone()
    }

    /// Data received by the last `before_commit`.
    pub fn received_data(&self) -> Option<TransactionData> {
        self.received_data.lock().clone()
    }

    /// Forgets everything recorded. The clock is left alone.
    pub fn reset(&self) {
        self.calls.lock().clear();
        *self.received_state.lock() = None;
        *self.received_data.lock() = None;
    }

    fn record(&self, callback: Callback) {
        let tick = self.clock.tick();
        self.calls.lock().push((callback, tick));
    }
}

impl<T> TransactionEventHandler for RecordingHandler<T>
where
    T: Clone + Send + Sync + 'static,
{
    type State = T;

    fn before_commit(&self, data: &TransactionData) -> Result<T, HandlerError> {
        self.record(Callback::BeforeCommit);
        *self.received_data.lock() = Some(data.clone());
        Ok(self.state.clone())
    }

    fn after_commit(&self, _data: &TransactionData, state: T) -> Result<(), HandlerError> {
        self.record(Callback::AfterCommit);
        *self.received_state.lock() = Some(state);
        Ok(())
    }

    fn after_rollback(&self, _data: &TransactionData, state: T) -> Result<(), HandlerError> {
        self.record(Callback::AfterRollback);
        *self.received_state.lock() = Some(state);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T> std::fmt::Debug for RecordingHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingHandler")
            .field("name", &self.name)
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

/// Runs the wrapped handler's `before_commit`, then vetoes.
///
/// After-phase callbacks are forwarded, so the wrapped handler's own
/// recording shows exactly what the failing handler received.
pub struct FailingHandler<H> {
    inner: Arc<H>,
    message: String,
    name: String,
}

impl<H: TransactionEventHandler> FailingHandler<H> {
    /// Wraps `inner`, vetoing with `message`.
    pub fn new(inner: Arc<H>, message: impl Into<String>) -> Self {
        let name = format!("failing({})", inner.name());
        Self {
            inner,
            message: message.into(),
            name,
        }
    }

    /// The wrapped handler.
    pub fn inner(&self) -> &Arc<H> {
        &self.inner
    }
}

impl<H: TransactionEventHandler> TransactionEventHandler for FailingHandler<H> {
    type State = H::State;

    fn before_commit(&self, data: &TransactionData) -> Result<H::State, HandlerError> {
        self.inner.before_commit(data)?;
        Err(HandlerError::new(self.message.clone()))
    }

    fn after_commit(&self, data: &TransactionData, state: H::State) -> Result<(), HandlerError> {
        self.inner.after_commit(data, state)
    }

    fn after_rollback(&self, data: &TransactionData, state: H::State) -> Result<(), HandlerError> {
        self.inner.after_rollback(data, state)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Panics inside one callback and succeeds in the others.
#[derive(Debug)]
pub struct PanickingHandler {
    callback: Callback,
    calls: AtomicUsize,
}

impl PanickingHandler {
    /// Creates a handler that panics in `callback`.
    pub fn new(callback: Callback) -> Self {
        Self {
            callback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of callbacks received, the panicking one included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, callback: Callback) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if callback == self.callback {
            panic!("handler panicked in {callback:?}");
        }
    }
}

impl TransactionEventHandler for PanickingHandler {
    type State = ();

    fn before_commit(&self, _data: &TransactionData) -> Result<(), HandlerError> {
        self.enter(Callback::BeforeCommit);
        Ok(())
    }

    fn after_commit(&self, _data: &TransactionData, _state: ()) -> Result<(), HandlerError> {
        self.enter(Callback::AfterCommit);
        Ok(())
    }

    fn after_rollback(&self, _data: &TransactionData, _state: ()) -> Result<(), HandlerError> {
        self.enter(Callback::AfterRollback);
        Ok(())
    }
}

/// Expected net changes of a transaction.
///
/// Property records are keyed by `(entity, key)`; a record appearing more
/// than once in the actual data is reported as a difference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpectedTransactionData {
    /// Expected created nodes.
    pub created_nodes: BTreeSet<NodeId>,
    /// Expected deleted nodes.
    pub deleted_nodes: BTreeSet<NodeId>,
    /// Expected created relationships.
    pub created_relationships: BTreeSet<RelationshipId>,
    /// Expected deleted relationships.
    pub deleted_relationships: BTreeSet<RelationshipId>,
    /// Expected assignments: `(entity, key) -> (value, previous)`.
    pub assigned: BTreeMap<(EntityRef, String), (PropertyValue, Option<PropertyValue>)>,
    /// Expected removals: `(entity, key) -> previous`.
    pub removed: BTreeMap<(EntityRef, String), PropertyValue>,
}

impl ExpectedTransactionData {
    /// Creates an expectation of no changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects `id` among the created nodes.
    #[must_use]
    pub fn created_node(mut self, id: NodeId) -> Self {
        self.created_nodes.insert(id);
        self
    }

    /// Expects `id` among the deleted nodes.
    #[must_use]
    pub fn deleted_node(mut self, id: NodeId) -> Self {
        self.deleted_nodes.insert(id);
        self
    }

    /// Expects `id` among the created relationships.
    #[must_use]
    pub fn created_relationship(mut self, id: RelationshipId) -> Self {
        self.created_relationships.insert(id);
        self
    }

    /// Expects `id` among the deleted relationships.
    #[must_use]
    pub fn deleted_relationship(mut self, id: RelationshipId) -> Self {
        self.deleted_relationships.insert(id);
        self
    }

    /// Expects one assignment record.
    #[must_use]
    pub fn assigned(
        mut self,
        entity: impl Into<EntityRef>,
        key: &str,
        value: impl Into<PropertyValue>,
        previous: Option<PropertyValue>,
    ) -> Self {
        self.assigned
            .insert((entity.into(), key.to_string()), (value.into(), previous));
        self
    }

    /// Expects one removal record.
    #[must_use]
    pub fn removed(
        mut self,
        entity: impl Into<EntityRef>,
        key: &str,
        previous: impl Into<PropertyValue>,
    ) -> Self {
        self.removed
            .insert((entity.into(), key.to_string()), previous.into());
        self
    }

    /// Lists every way `data` differs from this expectation.
    pub fn differences(&self, data: &TransactionData) -> Vec<String> {
        let mut diffs = Vec::new();

        compare_sets("created nodes", &self.created_nodes, data.created_nodes(), &mut diffs);
        compare_sets("deleted nodes", &self.deleted_nodes, data.deleted_nodes(), &mut diffs);
        compare_sets(
            "created relationships",
            &self.created_relationships,
            data.created_relationships(),
            &mut diffs,
        );
        compare_sets(
            "deleted relationships",
            &self.deleted_relationships,
            data.deleted_relationships(),
            &mut diffs,
        );

        let mut assigned = BTreeMap::new();
        for record in data.assigned_properties() {
            let slot = (record.entity, record.key.clone());
            let value = (record.value.clone(), record.previous.clone());
            if assigned.insert(slot, value).is_some() {
                diffs.push(format!(
                    "duplicate assignment for {}.{}",
                    record.entity, record.key
                ));
            }
        }
        if assigned != self.assigned {
            diffs.push(format!(
                "assigned properties: expected {:?}, got {:?}",
                self.assigned, assigned
            ));
        }

        let mut removed = BTreeMap::new();
        for record in data.removed_properties() {
            let slot = (record.entity, record.key.clone());
            if removed.insert(slot, record.previous.clone()).is_some() {
                diffs.push(format!(
                    "duplicate removal for {}.{}",
                    record.entity, record.key
                ));
            }
        }
        if removed != self.removed {
            diffs.push(format!(
                "removed properties: expected {:?}, got {:?}",
                self.removed, removed
            ));
        }

        diffs
    }
}

fn compare_sets<T>(label: &str, expected: &BTreeSet<T>, actual: &BTreeSet<T>, diffs: &mut Vec<String>)
where
    T: Ord + std::fmt::Debug,
{
    if expected != actual {
        diffs.push(format!("{label}: expected {expected:?}, got {actual:?}"));
    }
}

/// Checks every transaction against an [`ExpectedTransactionData`].
///
/// A mismatch in `before_commit` vetoes the transaction. The data is checked
/// again in `after_commit`, where a mismatch becomes a notification error.
#[derive(Debug, Default)]
pub struct VerifyingHandler {
    expected: Mutex<ExpectedTransactionData>,
    failures: Mutex<Vec<String>>,
    verified: AtomicUsize,
}

impl VerifyingHandler {
    /// Creates a handler expecting `expected`.
    pub fn new(expected: ExpectedTransactionData) -> Self {
        Self {
            expected: Mutex::new(expected),
            ..Self::default()
        }
    }

    /// Replaces the expectation for subsequent transactions.
    pub fn expect(&self, expected: ExpectedTransactionData) {
        *self.expected.lock() = expected;
    }

    /// Number of callbacks whose data matched.
    pub fn verified_count(&self) -> usize {
        self.verified.load(Ordering::SeqCst)
    }

    /// Mismatches found so far.
    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }

    fn verify(&self, data: &TransactionData) -> Result<(), HandlerError> {
        let diffs = self.expected.lock().differences(data);
        if diffs.is_empty() {
            self.verified.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            let message = diffs.join("; ");
            self.failures.lock().push(message.clone());
            Err(HandlerError::new(message))
        }
    }
}

impl TransactionEventHandler for VerifyingHandler {
    type State = ();

    fn before_commit(&self, data: &TransactionData) -> Result<(), HandlerError> {
        self.verify(data)
    }

    fn after_commit(&self, data: &TransactionData, _state: ()) -> Result<(), HandlerError> {
        self.verify(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphtx_core::ChangeTracker;
    use graphtx_core::{CommittedState, TransactionId};

    struct Empty;

    impl CommittedState for Empty {
        fn property(&self, _entity: EntityRef, _key: &str) -> Option<PropertyValue> {
            None
        }

        fn properties(&self, _entity: EntityRef) -> Vec<(String, PropertyValue)> {
            Vec::new()
        }
    }

    fn one_node_data() -> TransactionData {
        let mut tracker = ChangeTracker::new();
        tracker.record_node_created(NodeId::new(1));
        tracker.record_property_set(&Empty, NodeId::new(1).into(), "name", "x".into());
        tracker.snapshot(TransactionId::new(1))
    }

    #[test]
    fn recording_handler_tracks_calls() {
        let clock = CallClock::new();
        let handler = RecordingHandler::with_clock("r", 7, &clock);
        let data = one_node_data();

        let state = handler.before_commit(&data).unwrap();
        handler.after_commit(&data, state).unwrap();

        assert_eq!(
            handler.callbacks(),
            vec![Callback::BeforeCommit, Callback::AfterCommit]
        );
        assert_eq!(handler.tick_of(Callback::AfterCommit), Some(2));
        assert_eq!(handler.received_state(), Some(7));
        assert_eq!(handler.received_data(), Some(data));

        handler.reset();
        assert!(handler.calls().is_empty());
        assert_eq!(handler.received_state(), None);
    }

    #[test]
    fn failing_handler_forwards_then_vetoes() {
        let inner = RecordingHandler::shared("inner", 1);
        let failing = FailingHandler::new(Arc::clone(&inner), "no");

        assert!(failing.before_commit(&one_node_data()).is_err());
        assert_eq!(inner.count(Callback::BeforeCommit), 1);
        assert_eq!(failing.name(), "failing(inner)");
    }

    #[test]
    fn expected_data_matches() {
        let expected = ExpectedTransactionData::new()
            .created_node(NodeId::new(1))
            .assigned(NodeId::new(1), "name", "x", None);
        assert!(expected.differences(&one_node_data()).is_empty());
    }

    #[test]
    fn expected_data_reports_mismatch() {
        let handler = VerifyingHandler::new(ExpectedTransactionData::new());
        assert!(handler.before_commit(&one_node_data()).is_err());
        assert_eq!(handler.failures().len(), 1);
        assert_eq!(handler.verified_count(), 0);
    }
}
