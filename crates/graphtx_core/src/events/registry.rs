//! Identity-keyed registry of transaction event handlers.

use crate::error::{CoreError, CoreResult};
use crate::events::handler::{DynHandler, TransactionEventHandler};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A handler held by the registry.
///
/// Cheap to clone; a registry snapshot is a list of these.
#[derive(Clone)]
pub struct RegisteredHandler {
    /// Address of the handler allocation; the identity key.
    key: usize,
    handler: Arc<dyn DynHandler>,
}

impl RegisteredHandler {
    fn new<H: TransactionEventHandler>(handler: &Arc<H>) -> Self {
        let erased: Arc<dyn DynHandler> = Arc::clone(handler) as Arc<dyn DynHandler>;
        Self {
            key: identity(handler),
            handler: erased,
        }
    }

    /// Name of the handler.
    #[must_use]
    pub fn name(&self) -> &str {
        self.handler.name()
    }

    pub(crate) fn handler(&self) -> &dyn DynHandler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("name", &self.name())
            .field("key", &format_args!("{:#x}", self.key))
            .finish()
    }
}

fn identity<H>(handler: &Arc<H>) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}

fn handler_name<H: TransactionEventHandler>(handler: &Arc<H>) -> &str {
    TransactionEventHandler::name(handler.as_ref())
}

/// The set of handlers registered with one database.
///
/// Membership is by instance identity, not equality: two equal handler
/// values are two entries, and the same `Arc` registered twice is one.
/// Handlers are kept in registration order, which is the dispatch order.
///
/// The registry is thread-safe:
/// - handlers may be registered or unregistered from any thread
/// - [`snapshot`](Self::snapshot) returns a copy, so changes never affect a
///   commit already in flight
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<RegisteredHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler and returns the same reference.
    ///
    /// Registering an already-registered instance is a no-op.
    pub fn register<H: TransactionEventHandler>(&self, handler: Arc<H>) -> Arc<H> {
        let key = identity(&handler);
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|h| h.key == key) {
            tracing::debug!(handler = handler_name(&handler), "handler already registered");
        } else {
            handlers.push(RegisteredHandler::new(&handler));
            tracing::debug!(
                handler = handler_name(&handler),
                registered = handlers.len(),
                "registered transaction event handler"
            );
        }
        handler
    }

    /// Unregisters a handler and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HandlerNotRegistered`] if this instance is not
    /// currently registered, including when it was already unregistered.
    pub fn unregister<H: TransactionEventHandler>(&self, handler: &Arc<H>) -> CoreResult<Arc<H>> {
        let key = identity(handler);
        let mut handlers = self.handlers.write();
        match handlers.iter().position(|h| h.key == key) {
            Some(index) => {
                handlers.remove(index);
                tracing::debug!(
                    handler = handler_name(handler),
                    registered = handlers.len(),
                    "unregistered transaction event handler"
                );
                Ok(Arc::clone(handler))
            }
            None => Err(CoreError::handler_not_registered(handler_name(handler))),
        }
    }

    /// Returns true if this instance is registered.
    #[must_use]
    pub fn contains<H: TransactionEventHandler>(&self, handler: &Arc<H>) -> bool {
        let key = identity(handler);
        self.handlers.read().iter().any(|h| h.key == key)
    }

    /// Returns a stable copy of the registered handlers in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RegisteredHandler> {
        self.handlers.read().clone()
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &*self.handlers.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::events::data::TransactionData;
    use std::thread;

    #[derive(Debug, PartialEq)]
    struct Noop(u32);

    impl TransactionEventHandler for Noop {
        type State = ();

        fn before_commit(&self, _data: &TransactionData) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn register_returns_same_instance() {
        let registry = HandlerRegistry::new();
        let handler = Arc::new(Noop(1));

        let first = registry.register(Arc::clone(&handler));
        let second = registry.register(Arc::clone(&handler));

        assert!(Arc::ptr_eq(&first, &handler));
        assert!(Arc::ptr_eq(&second, &handler));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn equal_instances_are_distinct() {
        let registry = HandlerRegistry::new();
        let a = Arc::new(Noop(1));
        let b = Arc::new(Noop(1));
        assert!(*a == *b);

        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));
        assert_eq!(registry.len(), 2);

        registry.unregister(&a).unwrap();
        assert!(!registry.contains(&a));
        assert!(registry.contains(&b));
    }

    #[test]
    fn unregister_unknown_fails() {
        let registry = HandlerRegistry::new();
        let handler = Arc::new(Noop(1));

        let err = registry.unregister(&handler).unwrap_err();
        assert!(matches!(err, CoreError::HandlerNotRegistered { .. }));
    }

    #[test]
    fn double_unregister_fails() {
        let registry = HandlerRegistry::new();
        let handler = registry.register(Arc::new(Noop(1)));

        let removed = registry.unregister(&handler).unwrap();
        assert!(Arc::ptr_eq(&removed, &handler));
        assert!(registry.unregister(&handler).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let registry = HandlerRegistry::new();
        let handlers: Vec<_> = (0..4).map(|i| Arc::new(Noop(i))).collect();
        for h in &handlers {
            registry.register(Arc::clone(h));
        }
        registry.unregister(&handlers[1]).unwrap();
        registry.register(Arc::clone(&handlers[1]));

        let keys: Vec<usize> = registry.snapshot().iter().map(|h| h.key).collect();
        let expected: Vec<usize> = [0, 2, 3, 1].iter().map(|&i| identity(&handlers[i])).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn snapshot_is_a_stable_copy() {
        let registry = HandlerRegistry::new();
        let a = registry.register(Arc::new(Noop(1)));
        let snapshot = registry.snapshot();

        registry.register(Arc::new(Noop(2)));
        registry.unregister(&a).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].key, identity(&a));
    }

    #[test]
    fn concurrent_registration() {
        let registry = Arc::new(HandlerRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let handler = registry.register(Arc::new(Noop(i)));
                    let _ = registry.snapshot();
                    registry.register(Arc::clone(&handler));
                    handler
                })
            })
            .collect();

        let handlers: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(registry.len(), 8);
        for h in &handlers {
            registry.unregister(h).unwrap();
        }
        assert!(registry.is_empty());
    }
}
