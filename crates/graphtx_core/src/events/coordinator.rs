//! Commit protocol across registered handlers.
//!
//! One attempt walks `Collecting → BeforePhase → (Committed | RolledBack)`:
//!
//! 1. Every handler's `before_commit` runs in registration order. The first
//!    failure stops the walk; handlers after it are never called.
//! 2. The outcome is decided once. Commit needs every `before_commit` to
//!    succeed and the caller's apply step (the storage write) to succeed.
//! 3. Committed: `after_commit` goes to every handler. Rolled back:
//!    `after_rollback` goes only to the handlers whose `before_commit`
//!    completed, never to the one that failed or those not reached.
//!
//! After-phase failures cannot change the outcome. Each is logged and the
//! loop moves on to the next handler; after-commit failures are also
//! returned in the [`CommitReport`].

use crate::config::Config;
use crate::error::{CoreError, CoreResult, HandlerError, NotificationError};
use crate::events::data::TransactionData;
use crate::events::handler::ErasedState;
use crate::events::registry::RegisteredHandler;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Phase of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    /// The transaction is accumulating changes.
    Collecting,
    /// Handlers are inspecting the pending changes.
    BeforePhase,
    /// The transaction committed.
    Committed,
    /// The transaction rolled back.
    RolledBack,
}

/// Outcome of a committed attempt.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Number of handlers that received `after_commit` without error.
    pub notified: usize,
    /// After-commit failures; these did not affect the commit.
    pub notification_errors: Vec<NotificationError>,
}

impl CommitReport {
    /// Returns true if every handler was notified without error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.notification_errors.is_empty()
    }
}

/// Drives the commit protocol for one attempt at a time.
///
/// Stateless between attempts; per-attempt handler state lives on the stack
/// of [`attempt_with`](Self::attempt_with) and is dropped when it returns.
#[derive(Debug, Clone)]
pub struct CommitCoordinator {
    catch_panics: bool,
}

impl Default for CommitCoordinator {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl CommitCoordinator {
    /// Creates a coordinator for the given configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            catch_panics: config.catch_handler_panics,
        }
    }

    /// Runs the protocol with nothing to apply between the phases.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionVetoed`] if a handler's
    /// `before_commit` failed.
    pub fn attempt(
        &self,
        handlers: &[RegisteredHandler],
        data: &TransactionData,
    ) -> CoreResult<CommitReport> {
        self.attempt_with(handlers, data, || Ok(()))
            .map(|(report, ())| report)
    }

    /// Runs the protocol, calling `apply` once every handler accepted.
    ///
    /// `apply` is not called if a handler vetoes. If `apply` fails the
    /// attempt rolls back and its error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionVetoed`] on veto, or the error
    /// returned by `apply`.
    pub fn attempt_with<T, F>(
        &self,
        handlers: &[RegisteredHandler],
        data: &TransactionData,
        apply: F,
    ) -> CoreResult<(CommitReport, T)>
    where
        F: FnOnce() -> CoreResult<T>,
    {
        let txid = data.transaction_id();
        tracing::debug!(
            %txid,
            handlers = handlers.len(),
            changes = data.change_count(),
            phase = ?CommitPhase::BeforePhase,
            "running before-commit handlers"
        );

        let mut completed: Vec<(&RegisteredHandler, ErasedState)> =
            Vec::with_capacity(handlers.len());
        for registered in handlers {
            match self.invoke(|| registered.handler().before_commit(data)) {
                Ok(state) => completed.push((registered, state)),
                Err(source) => {
                    tracing::debug!(
                        %txid,
                        handler = registered.name(),
                        error = %source,
                        "transaction vetoed"
                    );
                    let veto = CoreError::transaction_vetoed(registered.name(), source);
                    self.notify_rolled_back(completed, data);
                    return Err(veto);
                }
            }
        }

        match apply() {
            Ok(value) => Ok((self.notify_committed(completed, data), value)),
            Err(err) => {
                tracing::debug!(%txid, error = %err, "apply failed after before-commit phase");
                self.notify_rolled_back(completed, data);
                Err(err)
            }
        }
    }

    fn notify_committed(
        &self,
        completed: Vec<(&RegisteredHandler, ErasedState)>,
        data: &TransactionData,
    ) -> CommitReport {
        tracing::debug!(
            txid = %data.transaction_id(),
            handlers = completed.len(),
            phase = ?CommitPhase::Committed,
            "notifying handlers"
        );
        let mut report = CommitReport::default();
        for (registered, state) in completed {
            match self.invoke(|| registered.handler().after_commit(data, state)) {
                Ok(()) => report.notified += 1,
                Err(source) => {
                    log_notification_failure(registered, CommitPhase::Committed, &source);
                    report.notification_errors.push(NotificationError {
                        handler: registered.name().to_string(),
                        phase: CommitPhase::Committed,
                        source,
                    });
                }
            }
        }
        report
    }

    fn notify_rolled_back(
        &self,
        completed: Vec<(&RegisteredHandler, ErasedState)>,
        data: &TransactionData,
    ) {
        tracing::debug!(
            txid = %data.transaction_id(),
            handlers = completed.len(),
            phase = ?CommitPhase::RolledBack,
            "notifying handlers"
        );
        for (registered, state) in completed {
            if let Err(source) = self.invoke(|| registered.handler().after_rollback(data, state)) {
                log_notification_failure(registered, CommitPhase::RolledBack, &source);
            }
        }
    }

    fn invoke<T, F>(&self, f: F) -> Result<T, HandlerError>
    where
        F: FnOnce() -> Result<T, HandlerError>,
    {
        if !self.catch_panics {
            return f();
        }
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(panic = %message, "handler callback panicked");
                Err(HandlerError::Panicked(message))
            }
        }
    }
}

fn log_notification_failure(
    registered: &RegisteredHandler,
    phase: CommitPhase,
    source: &HandlerError,
) {
    tracing::warn!(
        handler = registered.name(),
        ?phase,
        error = %source,
        "handler notification failed"
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handler::TransactionEventHandler;
    use crate::events::registry::HandlerRegistry;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Shared call log: (handler index, callback name).
    type CallLog = Arc<Mutex<Vec<(usize, &'static str)>>>;

    struct Spy {
        index: usize,
        log: CallLog,
        veto: bool,
        fail_after: bool,
    }

    impl Spy {
        fn new(index: usize, log: &CallLog) -> Self {
            Self {
                index,
                log: Arc::clone(log),
                veto: false,
                fail_after: false,
            }
        }
    }

    impl TransactionEventHandler for Spy {
        type State = usize;

        fn before_commit(&self, _data: &TransactionData) -> Result<usize, HandlerError> {
            self.log.lock().push((self.index, "before"));
            if self.veto {
                Err(HandlerError::new("Just failing commit, that's all"))
            } else {
                Ok(self.index * 10)
            }
        }

        fn after_commit(&self, _data: &TransactionData, state: usize) -> Result<(), HandlerError> {
            assert_eq!(state, self.index * 10);
            self.log.lock().push((self.index, "commit"));
            if self.fail_after {
                Err(HandlerError::new("after-commit failed"))
            } else {
                Ok(())
            }
        }

        fn after_rollback(
            &self,
            _data: &TransactionData,
            state: usize,
        ) -> Result<(), HandlerError> {
            assert_eq!(state, self.index * 10);
            self.log.lock().push((self.index, "rollback"));
            if self.fail_after {
                Err(HandlerError::new("after-rollback failed"))
            } else {
                Ok(())
            }
        }
    }

    struct Panicky;

    impl TransactionEventHandler for Panicky {
        type State = ();

        fn before_commit(&self, _data: &TransactionData) -> Result<(), HandlerError> {
            panic!("boom");
        }
    }

    fn setup(spies: Vec<Spy>) -> HandlerRegistry {
        let registry = HandlerRegistry::new();
        for spy in spies {
            registry.register(Arc::new(spy));
        }
        registry
    }

    #[test]
    fn no_handlers_commits() {
        let coordinator = CommitCoordinator::default();
        let report = coordinator
            .attempt(&[], &TransactionData::default())
            .unwrap();
        assert_eq!(report.notified, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn all_accept_then_commit_in_order() {
        let log = CallLog::default();
        let registry = setup((0..3).map(|i| Spy::new(i, &log)).collect());

        let report = CommitCoordinator::default()
            .attempt(&registry.snapshot(), &TransactionData::default())
            .unwrap();

        assert_eq!(report.notified, 3);
        assert_eq!(
            *log.lock(),
            vec![
                (0, "before"),
                (1, "before"),
                (2, "before"),
                (0, "commit"),
                (1, "commit"),
                (2, "commit"),
            ]
        );
    }

    #[test]
    fn veto_stops_walk_and_rolls_back_completed_only() {
        let log = CallLog::default();
        let mut spies: Vec<_> = (0..4).map(|i| Spy::new(i, &log)).collect();
        spies[2].veto = true;
        let registry = setup(spies);

        let err = CommitCoordinator::default()
            .attempt(&registry.snapshot(), &TransactionData::default())
            .unwrap_err();

        assert!(err.is_veto());
        assert_eq!(
            *log.lock(),
            vec![
                (0, "before"),
                (1, "before"),
                (2, "before"),
                (0, "rollback"),
                (1, "rollback"),
            ]
        );
    }

    #[test]
    fn apply_failure_rolls_back_everyone() {
        let log = CallLog::default();
        let registry = setup((0..2).map(|i| Spy::new(i, &log)).collect());

        let result: CoreResult<(CommitReport, ())> = CommitCoordinator::default().attempt_with(
            &registry.snapshot(),
            &TransactionData::default(),
            || Err(CoreError::constraint_violation("node still has relationships")),
        );

        assert!(matches!(result, Err(CoreError::ConstraintViolation { .. })));
        assert_eq!(
            *log.lock(),
            vec![(0, "before"), (1, "before"), (0, "rollback"), (1, "rollback")]
        );
    }

    #[test]
    fn apply_not_called_on_veto() {
        let log = CallLog::default();
        let mut spy = Spy::new(0, &log);
        spy.veto = true;
        let registry = setup(vec![spy]);

        let mut applied = false;
        let result = CommitCoordinator::default().attempt_with(
            &registry.snapshot(),
            &TransactionData::default(),
            || {
                applied = true;
                Ok(())
            },
        );
        assert!(result.is_err());
        assert!(!applied);
    }

    #[test]
    fn after_commit_failure_does_not_stop_others() {
        let log = CallLog::default();
        let mut spies: Vec<_> = (0..3).map(|i| Spy::new(i, &log)).collect();
        spies[0].fail_after = true;
        let registry = setup(spies);

        let report = CommitCoordinator::default()
            .attempt(&registry.snapshot(), &TransactionData::default())
            .unwrap();

        assert_eq!(report.notified, 2);
        assert_eq!(report.notification_errors.len(), 1);
        assert_eq!(report.notification_errors[0].phase, CommitPhase::Committed);
        assert_eq!(
            log.lock().iter().filter(|(_, call)| *call == "commit").count(),
            3
        );
    }

    #[test]
    fn after_rollback_failure_does_not_stop_others() {
        let log = CallLog::default();
        let mut spies: Vec<_> = (0..3).map(|i| Spy::new(i, &log)).collect();
        spies[0].fail_after = true;
        spies[2].veto = true;
        let registry = setup(spies);

        let err = CommitCoordinator::default()
            .attempt(&registry.snapshot(), &TransactionData::default())
            .unwrap_err();

        assert!(err.is_veto());
        assert_eq!(
            log.lock().iter().filter(|(_, call)| *call == "rollback").count(),
            2
        );
    }

    #[test]
    fn panic_in_before_commit_is_a_veto() {
        let log = CallLog::default();
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(Spy::new(0, &log)));
        registry.register(Arc::new(Panicky));
        registry.register(Arc::new(Spy::new(2, &log)));

        let err = CommitCoordinator::default()
            .attempt(&registry.snapshot(), &TransactionData::default())
            .unwrap_err();

        match err {
            CoreError::TransactionVetoed { source, .. } => {
                assert!(matches!(source, HandlerError::Panicked(ref m) if m == "boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.lock(), vec![(0, "before"), (0, "rollback")]);
    }

    #[test]
    fn panic_propagates_when_not_caught() {
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(Panicky));
        let coordinator = CommitCoordinator::new(&Config::new().catch_handler_panics(false));

        let handlers = registry.snapshot();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            coordinator.attempt(&handlers, &TransactionData::default())
        }));
        assert!(result.is_err());
    }
}
