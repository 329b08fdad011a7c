//! Awaitable, cancellable handles for in-flight session operations.
//!
//! Every asynchronous operation returns an [`AsyncTaskHandle`] and keeps the
//! matching [`TaskCompleter`]. Only the completer can resolve the handle, and
//! it can do so exactly once.

use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::error::SessionError;

pub type TaskOutcome<T> = Result<T, SessionError>;

type Continuation<T> = Box<dyn FnOnce(TaskOutcome<T>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Completed,
    Failed,
    Canceled,
}

struct Inner<T> {
    state: TaskState,
    outcome: Option<TaskOutcome<T>>,
    continuation: Option<Continuation<T>>,
    continuation_registered: bool,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    resolved: Condvar,
    notify: Notify,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
}

/// Caller side of an asynchronous operation.
pub struct AsyncTaskHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AsyncTaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> std::fmt::Debug for AsyncTaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTaskHandle")
            .field("state", &self.shared.inner.lock().state)
            .finish()
    }
}

/// Executor side of an asynchronous operation.
///
/// Dropping a completer that never resolved fails its handle with
/// [`SessionError::Faulted`].
pub struct TaskCompleter<T> {
    shared: Arc<Shared<T>>,
}

/// Creates a pending handle and the completer that resolves it.
pub fn pair<T>() -> (AsyncTaskHandle<T>, TaskCompleter<T>) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            state: TaskState::Pending,
            outcome: None,
            continuation: None,
            continuation_registered: false,
        }),
        resolved: Condvar::new(),
        notify: Notify::new(),
        cancel_requested: AtomicBool::new(false),
        cancel_notify: Notify::new(),
    });
    (
        AsyncTaskHandle {
            shared: shared.clone(),
        },
        TaskCompleter { shared },
    )
}

impl<T: Clone + Send + 'static> AsyncTaskHandle<T> {
    /// A handle that is already completed with `value`.
    pub fn completed(value: T) -> Self {
        let (handle, completer) = pair();
        let _ = completer.complete(value);
        handle
    }

    /// A handle that already failed with `err`.
    pub fn failed(err: SessionError) -> Self {
        let (handle, completer) = pair();
        let _ = completer.fail(err);
        handle
    }

    pub fn state(&self) -> TaskState {
        self.shared.inner.lock().state
    }

    pub fn is_pending(&self) -> bool {
        self.state() == TaskState::Pending
    }

    /// The outcome, if the handle has resolved.
    pub fn outcome(&self) -> Option<TaskOutcome<T>> {
        self.shared.inner.lock().outcome.clone()
    }

    /// Registers the single continuation for this handle.
    ///
    /// If the handle already resolved the callback runs right away on the
    /// calling thread. Otherwise it runs on whichever context resolves the
    /// handle. A second registration is rejected with `InvalidState`.
    pub fn on_completion<F>(&self, callback: F) -> Result<(), SessionError>
    where
        F: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.continuation_registered {
            return Err(SessionError::invalid_state("on_completion", inner.state));
        }
        inner.continuation_registered = true;
        match inner.outcome.clone() {
            Some(outcome) => {
                drop(inner);
                callback(outcome);
            }
            None => inner.continuation = Some(Box::new(callback)),
        }
        Ok(())
    }

    /// Requests cooperative cancellation.
    ///
    /// Returns `false` when the handle already resolved; completion that
    /// happens before the request wins. A `true` return only means the
    /// executor was asked to stop: the handle still ends up `Canceled` or,
    /// if the executor finished first, `Completed`.
    pub fn cancel(&self) -> bool {
        let inner = self.shared.inner.lock();
        if inner.state != TaskState::Pending {
            return false;
        }
        self.shared.cancel_requested.store(true, Ordering::SeqCst);
        drop(inner);
        self.shared.cancel_notify.notify_waiters();
        true
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been requested on any clone.
    pub async fn cancel_requested(&self) {
        loop {
            let notified = self.shared.cancel_notify.notified();
            if self.is_cancel_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Waits for the handle to resolve.
    pub async fn wait(&self) -> TaskOutcome<T> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Blocks the calling thread until the handle resolves.
    ///
    /// Meant for synchronous callers; calling it from inside an async task
    /// stalls that runtime worker.
    pub fn blocking_wait(&self) -> TaskOutcome<T> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(outcome) = inner.outcome.clone() {
                return outcome;
            }
            self.shared.resolved.wait(&mut inner);
        }
    }
}

impl<T: Clone + Send + 'static> IntoFuture for AsyncTaskHandle<T> {
    type Output = TaskOutcome<T>;
    type IntoFuture = BoxFuture<'static, TaskOutcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

impl<T> TaskCompleter<T> {
    pub fn complete(&self, value: T) -> Result<(), SessionError>
    where
        T: Clone,
    {
        self.resolve(TaskState::Completed, Ok(value))
    }

    pub fn fail(&self, err: SessionError) -> Result<(), SessionError>
    where
        T: Clone,
    {
        self.resolve(TaskState::Failed, Err(err))
    }

    pub fn cancel(&self) -> Result<(), SessionError>
    where
        T: Clone,
    {
        self.resolve(TaskState::Canceled, Err(SessionError::Canceled))
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.inner.lock().state != TaskState::Pending
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::SeqCst)
    }

    /// Resolves once the caller has requested cancellation.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.shared.cancel_notify.notified();
            if self.is_cancel_requested() {
                return;
            }
            notified.await;
        }
    }

    fn resolve(&self, state: TaskState, outcome: TaskOutcome<T>) -> Result<(), SessionError>
    where
        T: Clone,
    {
        let mut inner = self.shared.inner.lock();
        if inner.state != TaskState::Pending {
            return Err(SessionError::invalid_state("resolve", inner.state));
        }
        inner.state = state;
        inner.outcome = Some(outcome.clone());
        let continuation = inner.continuation.take();
        drop(inner);

        self.shared.resolved.notify_all();
        self.shared.notify.notify_waiters();
        if let Some(continuation) = continuation {
            continuation(outcome);
        }
        Ok(())
    }
}

impl<T> Drop for TaskCompleter<T> {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        if inner.state != TaskState::Pending {
            return;
        }
        tracing::warn!("task completer dropped before resolving");
        inner.state = TaskState::Failed;
        inner.outcome = Some(Err(dropped_error()));
        let continuation = inner.continuation.take();
        drop(inner);

        self.shared.resolved.notify_all();
        self.shared.notify.notify_waiters();
        if let Some(continuation) = continuation {
            continuation(Err(dropped_error()));
        }
    }
}

fn dropped_error() -> SessionError {
    SessionError::Faulted("operation ended without resolving".to_string())
}
