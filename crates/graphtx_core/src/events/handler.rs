//! Transaction event handler trait.

use crate::error::HandlerError;
use crate::events::data::TransactionData;
use std::any::Any;

/// An observer notified around a transaction's commit decision.
///
/// `before_commit` runs before the decision and may veto the transaction by
/// returning an error. The state it returns is handed back unchanged to the
/// same handler's `after_commit` or `after_rollback` for that attempt.
///
/// # Example
///
/// ```rust,ignore
/// use graphtx_core::{HandlerError, TransactionData, TransactionEventHandler};
///
/// struct ForbidDeletes;
///
/// impl TransactionEventHandler for ForbidDeletes {
///     type State = ();
///
///     fn before_commit(&self, data: &TransactionData) -> Result<(), HandlerError> {
///         if data.deleted_nodes().is_empty() {
///             Ok(())
///         } else {
///             Err(HandlerError::new("nodes may not be deleted"))
///         }
///     }
/// }
/// ```
pub trait TransactionEventHandler: Send + Sync + 'static {
    /// Per-attempt state produced by `before_commit`.
    type State: Send + 'static;

    /// Inspects the pending changes. Returning an error vetoes the commit.
    fn before_commit(&self, data: &TransactionData) -> Result<Self::State, HandlerError>;

    /// Called after the transaction committed.
    fn after_commit(&self, data: &TransactionData, state: Self::State) -> Result<(), HandlerError> {
        let _ = (data, state);
        Ok(())
    }

    /// Called after the transaction rolled back, only if this handler's
    /// `before_commit` completed successfully in the same attempt.
    fn after_rollback(
        &self,
        data: &TransactionData,
        state: Self::State,
    ) -> Result<(), HandlerError> {
        let _ = (data, state);
        Ok(())
    }

    /// Name used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Type-erased per-attempt state.
pub(crate) type ErasedState = Box<dyn Any + Send>;

/// Object-safe view of a [`TransactionEventHandler`], so handlers with
/// different state types can share one registry.
pub(crate) trait DynHandler: Send + Sync {
    fn before_commit(&self, data: &TransactionData) -> Result<ErasedState, HandlerError>;

    fn after_commit(&self, data: &TransactionData, state: ErasedState) -> Result<(), HandlerError>;

    fn after_rollback(&self, data: &TransactionData, state: ErasedState)
        -> Result<(), HandlerError>;

    fn name(&self) -> &str;
}

impl<H: TransactionEventHandler> DynHandler for H {
    fn before_commit(&self, data: &TransactionData) -> Result<ErasedState, HandlerError> {
        let state = TransactionEventHandler::before_commit(self, data)?;
        Ok(Box::new(state))
    }

    fn after_commit(&self, data: &TransactionData, state: ErasedState) -> Result<(), HandlerError> {
        let state = downcast_state::<H>(state)?;
        TransactionEventHandler::after_commit(self, data, state)
    }

    fn after_rollback(
        &self,
        data: &TransactionData,
        state: ErasedState,
    ) -> Result<(), HandlerError> {
        let state = downcast_state::<H>(state)?;
        TransactionEventHandler::after_rollback(self, data, state)
    }

    fn name(&self) -> &str {
        TransactionEventHandler::name(self)
    }
}

fn downcast_state<H: TransactionEventHandler>(state: ErasedState) -> Result<H::State, HandlerError> {
    state
        .downcast::<H::State>()
        .map(|boxed| *boxed)
        .map_err(|_| HandlerError::new("handler state does not match the handler's state type"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(u32);

    impl TransactionEventHandler for Echo {
        type State = u32;

        fn before_commit(&self, _data: &TransactionData) -> Result<u32, HandlerError> {
            Ok(self.0)
        }

        fn after_commit(&self, _data: &TransactionData, state: u32) -> Result<(), HandlerError> {
            if state == self.0 {
                Ok(())
            } else {
                Err(HandlerError::new("state changed"))
            }
        }
    }

    #[test]
    fn erased_state_round_trips_to_same_handler() {
        let handler = Echo(7);
        let data = TransactionData::default();
        let state = DynHandler::before_commit(&handler, &data).unwrap();
        DynHandler::after_commit(&handler, &data, state).unwrap();
    }

    #[test]
    fn mismatched_state_is_an_error() {
        let handler = Echo(7);
        let data = TransactionData::default();
        let wrong: ErasedState = Box::new("not a u32");
        assert!(DynHandler::after_commit(&handler, &data, wrong).is_err());
    }

    #[test]
    fn default_rollback_is_ok() {
        let handler = Echo(1);
        let data = TransactionData::default();
        assert!(TransactionEventHandler::after_rollback(&handler, &data, 1).is_ok());
        assert!(DynHandler::name(&handler).ends_with("Echo"));
    }
}
