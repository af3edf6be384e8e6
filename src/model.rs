//! Core data model.
//!
//! A work item is something that needs doing exactly once, in turn. It has a
//! description (its only identity in diagnostics), a callable that either
//! finishes inline or hands back a deferred result, and optional outcome
//! callbacks.

use std::future::Future;

use futures::future::BoxFuture;

// ---------------------------------------------------------------------------
// Work Id
// ---------------------------------------------------------------------------

/// Newtype for work item identifiers.
///
/// Assigned at submission, monotonically increasing. Identifiers are unique
/// within one queue generation; [`clear`](crate::scheduler::Scheduler::clear)
/// starts a fresh generation and the counter restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkId(pub u64);

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// What a callable produced: a value right now, or a result later.
pub enum Step<T> {
    /// The work finished inline with a value.
    Ready(T),
    /// The work continues elsewhere; the future settles at some later point.
    Pending(BoxFuture<'static, anyhow::Result<T>>),
}

impl<T> Step<T> {
    /// An immediately available value.
    pub fn ready(value: T) -> Self {
        Step::Ready(value)
    }

    /// A deferred result. Boxes the future.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Step::Pending(Box::pin(future))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub(crate) type Task<T> = Box<dyn FnOnce() -> anyhow::Result<Step<T>> + Send>;
pub(crate) type Callback<T> = Box<dyn FnOnce(T) + Send>;

/// Builder for a unit of work. The scheduler's public API for submitting.
///
/// The callable runs when the item reaches the front of the queue. Returning
/// `Err` is the synchronous failure path; returning `Ok(Step::Pending(..))`
/// suspends the queue (unless the item is fire-and-forget) until the future
/// settles.
///
/// The description is mandatory: a deferred failure surfaces long after the
/// submission call stack is gone, and the description is the only context a
/// diagnostic can carry.
pub struct Work<T> {
    pub(crate) task: Task<T>,
    pub(crate) description: String,
    pub(crate) on_complete: Option<Callback<T>>,
    pub(crate) on_failure: Option<Callback<anyhow::Error>>,
    pub(crate) on_error: Option<Callback<anyhow::Error>>,
    pub(crate) fire_and_forget: bool,
}

impl<T> Work<T> {
    pub fn new(
        description: impl Into<String>,
        task: impl FnOnce() -> anyhow::Result<Step<T>> + Send + 'static,
    ) -> Self {
        Self {
            task: Box::new(task),
            description: description.into(),
            on_complete: None,
            on_failure: None,
            on_error: None,
            fire_and_forget: false,
        }
    }

    /// Receives the value on successful completion.
    pub fn on_complete(mut self, f: impl FnOnce(T) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Receives the reason when a deferred result rejects. Takes precedence
    /// over [`on_error`](Self::on_error). Never invoked for synchronous
    /// failures.
    pub fn on_failure(mut self, f: impl FnOnce(anyhow::Error) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    /// Fallback handler for any failure, synchronous or deferred, when no
    /// dedicated handler applies.
    pub fn on_error(mut self, f: impl FnOnce(anyhow::Error) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Advance the queue as soon as this item's deferred result is obtained,
    /// instead of waiting for it to settle. Later items then run interleaved
    /// with this one's settlement.
    pub fn fire_and_forget(mut self) -> Self {
        self.fire_and_forget = true;
        self
    }
}
