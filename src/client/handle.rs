//! Pollable handles to outstanding remote operations.

use std::future::Future;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

enum HandleState<T> {
    /// The operation could not be started
    Unbound,
    Pending(oneshot::Receiver<T>),
    Finished(Option<T>),
    /// Released by its owner, or the operation was dropped before completing
    Released,
}

/// Pollable handle to one remote operation.
///
/// The handle moves `Unbound` or `Pending -> Finished`, and any state moves to
/// released through [`AsyncHandle::release`]. Releasing a pending handle
/// abandons the operation rather than waiting for it, and releasing twice is
/// a no-op.
pub struct AsyncHandle<T> {
    state: HandleState<T>,
}

impl<T> Default for AsyncHandle<T> {
    fn default() -> Self {
        Self::released()
    }
}

impl<T> std::fmt::Debug for AsyncHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            HandleState::Unbound => "Unbound",
            HandleState::Pending(_) => "Pending",
            HandleState::Finished(_) => "Finished",
            HandleState::Released => "Released",
        };
        f.debug_struct("AsyncHandle").field("state", &state).finish()
    }
}

impl<T: Send + 'static> AsyncHandle<T> {
    /// Runs `future` on `runtime` and returns a handle to its output
    pub fn spawn<F>(runtime: &Handle, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        runtime.spawn(async move {
            // the receiver may already be gone if the handle was released
            let _ = tx.send(future.await);
        });
        Self {
            state: HandleState::Pending(rx),
        }
    }

    /// Runs blocking work on the runtime's blocking pool
    pub fn spawn_blocking<F>(runtime: &Handle, work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        runtime.spawn_blocking(move || {
            let _ = tx.send(work());
        });
        Self {
            state: HandleState::Pending(rx),
        }
    }
}

impl<T> AsyncHandle<T> {
    /// Handle for an operation that could not be started
    pub fn invalid() -> Self {
        Self {
            state: HandleState::Unbound,
        }
    }

    /// Handle that owns nothing, the state of a slot with no operation
    pub fn released() -> Self {
        Self {
            state: HandleState::Released,
        }
    }

    /// Handle that is already finished with `value`
    pub fn ready(value: T) -> Self {
        Self {
            state: HandleState::Finished(Some(value)),
        }
    }

    /// True while the handle refers to a started operation
    pub fn is_valid(&self) -> bool {
        matches!(
            self.state,
            HandleState::Pending(_) | HandleState::Finished(_)
        )
    }

    pub fn is_pending(&mut self) -> bool {
        self.is_valid() && !self.is_finished()
    }

    /// Polls the operation without blocking
    pub fn is_finished(&mut self) -> bool {
        if let HandleState::Pending(rx) = &mut self.state {
            match rx.try_recv() {
                Ok(value) => self.state = HandleState::Finished(Some(value)),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Closed) => self.state = HandleState::Finished(None),
            }
        }
        matches!(self.state, HandleState::Finished(_))
    }

    /// Result of a finished operation.
    ///
    /// `None` while pending, after the value was taken, or when the task was
    /// dropped before producing one.
    pub fn take(&mut self) -> Option<T> {
        if !self.is_finished() {
            return None;
        }
        match &mut self.state {
            HandleState::Finished(value) => value.take(),
            _ => None,
        }
    }

    /// Borrow of the result of a finished operation
    pub fn get(&mut self) -> Option<&T> {
        if !self.is_finished() {
            return None;
        }
        match &self.state {
            HandleState::Finished(value) => value.as_ref(),
            _ => None,
        }
    }

    /// Blocks the calling thread until the operation finishes.
    ///
    /// Escape hatch for callers outside the tick loop: it must not be called
    /// from a tick or from inside an async context.
    pub fn wait(&mut self) {
        let state = std::mem::replace(&mut self.state, HandleState::Released);
        self.state = match state {
            HandleState::Pending(rx) => HandleState::Finished(rx.blocking_recv().ok()),
            other => other,
        };
    }

    /// Drops the handle's interest in the operation; safe to call repeatedly
    pub fn release(&mut self) {
        self.state = HandleState::Released;
    }
}

impl AsyncHandle<bool> {
    /// Boolean result accessor, false until finished
    pub fn bool_value(&mut self) -> bool {
        self.get().copied().unwrap_or(false)
    }
}
