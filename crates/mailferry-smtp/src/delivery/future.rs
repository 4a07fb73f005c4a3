//! Single-assignment, observable delivery result cell.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::result::DeliveryResult;

type Callback = Box<dyn FnOnce(&DeliveryResult) + Send>;

enum State {
    Pending(Vec<Callback>),
    Resolved(Arc<DeliveryResult>),
}

/// Observable handle to the outcome of one delivery transaction.
///
/// Resolves exactly once. Clones share the same cell, so a caller may
/// hand the future around, await it from several places, and register
/// completion listeners; listeners registered after resolution still fire
/// exactly once, synchronously, with the stored result.
#[derive(Clone)]
pub struct DeliveryFuture {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

impl DeliveryFuture {
    /// Creates an unresolved future.
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending(Vec::new())),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolves the future.
    ///
    /// Returns false if it was already resolved; a second resolution has
    /// no observable effect on registered listeners or waiters.
    pub(crate) fn complete(&self, result: DeliveryResult) -> bool {
        let resolved = Arc::new(result);
        let callbacks = {
            let mut state = self.lock();
            match &mut *state {
                State::Resolved(_) => return false,
                State::Pending(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *state = State::Resolved(Arc::clone(&resolved));
                    callbacks
                }
            }
        };
        // Callbacks run outside the lock so they may touch this future.
        for callback in callbacks {
            callback(&resolved);
        }
        self.shared.notify.notify_waiters();
        true
    }

    /// Waits until the future resolves and returns the result.
    pub async fn wait(&self) -> Arc<DeliveryResult> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(result) = self.try_result() {
                return result;
            }
            notified.await;
        }
    }

    /// Returns the result if the future already resolved.
    #[must_use]
    pub fn try_result(&self) -> Option<Arc<DeliveryResult>> {
        match &*self.lock() {
            State::Resolved(result) => Some(Arc::clone(result)),
            State::Pending(_) => None,
        }
    }

    /// Returns true if the future has resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(&*self.lock(), State::Resolved(_))
    }

    /// Registers a listener invoked exactly once with the result.
    ///
    /// Fires immediately when the future already resolved, on the
    /// registering thread; otherwise upon resolution, on the resolving
    /// task.
    pub fn on_complete(&self, callback: impl FnOnce(&DeliveryResult) + Send + 'static) {
        {
            let mut state = self.lock();
            if let State::Pending(callbacks) = &mut *state {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        if let Some(result) = self.try_result() {
            callback(&result);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DeliveryFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryFuture")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
