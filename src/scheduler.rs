//! Core scheduler. The public API for submitting and managing work.
//!
//! The scheduler owns the pending queue and a single execution slot. Work
//! items run one at a time, in submission order, whether they finish inline
//! or settle later. Cancellation voids an item's callbacks without aborting
//! the underlying operation; [`clear`](Scheduler::clear) voids an entire
//! queue generation at once.
//!
//! All user code (callables, callbacks, deferred futures) runs with the
//! internal lock released, so it may freely re-enter the scheduler.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::model::{Step, Work, WorkId};

/// A closure that dispatches an item's already-determined outcome to the
/// right callback (or diagnostic). Built at execution time, invoked only
/// once the scheduler has ruled out cancellation and staleness.
type Deliver = Box<dyn FnOnce() + Send>;

type RunFn = Box<dyn FnOnce() -> Launch + Send>;

/// What executing a callable led to.
enum Launch {
    /// Outcome known immediately (value or synchronous failure).
    Settled(Deliver),
    /// Deferred result; the future resolves to the outcome dispatch.
    Pending(BoxFuture<'static, Deliver>),
}

/// The scheduler's ruling on an outcome that is ready to dispatch.
enum Verdict {
    Deliver,
    /// Cancelled between dispatch and settlement; mark consumed, no callback.
    Suppressed,
    /// The owning queue generation was cleared; the entry no longer exists.
    Stale,
}

/// A submitted work item, type-erased, waiting its turn.
struct Entry {
    id: WorkId,
    description: String,
    fire_and_forget: bool,
    run: RunFn,
}

struct Shared {
    /// Diagnostic name, distinguishes instances in logs.
    name: String,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Entry>,
    /// Identifiers marked for suppression. Membership is transient: a mark
    /// is consumed the moment the scheduler observes it.
    cancelled: HashSet<u64>,
    /// Popped entries whose outcome has not yet been delivered or discarded.
    live: HashSet<u64>,
    next_id: u64,
    /// Generation counter. Advanced by `clear`; an outcome arriving under a
    /// newer epoch than it was dispatched in is a no-op.
    epoch: u64,
    /// Execution slot. True while an entry's synchronous body or wait-mode
    /// settlement is outstanding.
    running: bool,
}

/// Single-consumer, strictly-ordered task scheduler.
///
/// Cheap to clone; clones share the same queue. Independent instances are
/// fully isolated from one another.
///
/// Wait-mode items (the default) hold the queue until their outcome, value
/// or failure, has been delivered; fire-and-forget items release it as soon
/// as their deferred result is obtained. Items whose callable returns
/// [`Step::Pending`] require an ambient Tokio runtime; purely synchronous
/// use does not.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// A fresh, empty, idle scheduler with the default diagnostic name.
    pub fn new() -> Self {
        Self::named("default")
    }

    /// A fresh scheduler whose log events carry `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Submit a unit of work. Never blocks behind other work; returns the
    /// item's identifier immediately.
    ///
    /// If the scheduler is idle the item (and any synchronously-completing
    /// successors) executes before `submit` returns.
    pub fn submit<T: Send + 'static>(&self, work: Work<T>) -> WorkId {
        let Work {
            task,
            description,
            on_complete,
            on_failure,
            on_error,
            fire_and_forget,
        } = work;

        let name = self.shared.name.clone();
        let desc = description.clone();
        let run: RunFn = Box::new(move || match task() {
            Ok(Step::Ready(value)) => Launch::Settled(Box::new(move || {
                if let Some(cb) = on_complete {
                    cb(value);
                }
            })),
            Ok(Step::Pending(future)) => Launch::Pending(Box::pin(async move {
                let deliver: Deliver = match future.await {
                    Ok(value) => Box::new(move || {
                        if let Some(cb) = on_complete {
                            cb(value);
                        }
                    }),
                    Err(reason) => Box::new(move || {
                        // Exactly one of these fires: dedicated failure
                        // handler, then fallback, then diagnostic.
                        if let Some(cb) = on_failure {
                            cb(reason);
                        } else if let Some(cb) = on_error {
                            cb(reason);
                        } else {
                            error!(
                                scheduler = %name,
                                work = %desc,
                                %reason,
                                "deferred result rejected with no error handler"
                            );
                        }
                    }),
                };
                deliver
            })),
            Err(reason) => Launch::Settled(Box::new(move || {
                if let Some(cb) = on_error {
                    cb(reason);
                } else {
                    error!(
                        scheduler = %name,
                        work = %desc,
                        %reason,
                        "work item failed with no error handler"
                    );
                }
            })),
        });

        let id = {
            let mut s = self.shared.state.lock();
            let id = WorkId(s.next_id);
            s.next_id += 1;
            s.queue.push_back(Entry {
                id,
                description,
                fire_and_forget,
                run,
            });
            id
        };
        debug!(scheduler = %self.shared.name, %id, fire_and_forget, "work submitted");
        self.pump();
        id
    }

    /// Mark an item for suppression. Idempotent; unknown, completed, and
    /// already-cancelled identifiers are accepted silently.
    ///
    /// A still-queued item is skipped without its callable ever running. An
    /// item already awaiting a deferred outcome keeps running, but none of
    /// its callbacks, success or failure, will fire.
    pub fn cancel(&self, id: WorkId) {
        let mut s = self.shared.state.lock();
        let known = s.live.contains(&id.0) || s.queue.iter().any(|e| e.id == id);
        if known {
            s.cancelled.insert(id.0);
            debug!(scheduler = %self.shared.name, %id, "cancellation requested");
        }
    }

    /// Is this item still going to have an effect? True while it is pending
    /// or in flight; false once cancelled, completed, or unknown.
    pub fn is_alive(&self, id: WorkId) -> bool {
        let s = self.shared.state.lock();
        if s.cancelled.contains(&id.0) {
            return false;
        }
        s.live.contains(&id.0) || s.queue.iter().any(|e| e.id == id)
    }

    /// Discard the queue's entire future behavior: drop all pending entries,
    /// void every in-flight callback, reset to idle.
    ///
    /// Entries already awaiting a deferred outcome are not aborted; they
    /// settle naturally, and the epoch check discards their outcome on
    /// arrival. Identifier assignment restarts with the new generation.
    pub fn clear(&self) {
        let mut s = self.shared.state.lock();
        s.epoch += 1;
        s.queue.clear();
        s.cancelled.clear();
        s.live.clear();
        s.running = false;
        s.next_id = 0;
        debug!(scheduler = %self.shared.name, epoch = s.epoch, "queue cleared");
    }

    /// Number of entries waiting behind the execution slot.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// True when nothing is queued and nothing holds the execution slot.
    /// Fire-and-forget items still awaiting settlement do not count.
    pub fn is_idle(&self) -> bool {
        let s = self.shared.state.lock();
        !s.running && s.queue.is_empty()
    }

    // -----------------------------------------------------------------------
    // Execution loop
    // -----------------------------------------------------------------------

    /// Claim the execution slot and drive the queue. Returns immediately if
    /// the slot is already held or there is nothing to do.
    fn pump(&self) {
        let epoch = {
            let mut s = self.shared.state.lock();
            if s.running || s.queue.is_empty() {
                return;
            }
            s.running = true;
            s.epoch
        };
        self.drive(epoch);
    }

    /// Run entries until the queue empties, a wait-mode item suspends, or the
    /// generation we claimed the slot under is cleared out from under us.
    fn drive(&self, epoch: u64) {
        while let Some(entry) = self.next_entry(epoch) {
            let Entry {
                id,
                description,
                fire_and_forget,
                run,
            } = entry;
            trace!(scheduler = %self.shared.name, %id, work = %description, "executing");

            match run() {
                Launch::Settled(deliver) => match self.settle_verdict(id, epoch) {
                    Verdict::Deliver => deliver(),
                    Verdict::Suppressed => {
                        debug!(scheduler = %self.shared.name, %id, "cancelled in flight, outcome discarded");
                    }
                    // clear() ran inside the callable; the slot is no longer ours.
                    Verdict::Stale => return,
                },
                Launch::Pending(outcome) => {
                    if fire_and_forget {
                        // Launch is ordered, settlement is not: advance now.
                        self.watch(id, epoch, outcome, false);
                    } else {
                        // Slot stays claimed until the watcher delivers.
                        self.watch(id, epoch, outcome, true);
                        return;
                    }
                }
            }
        }
    }

    /// Pop the next runnable entry. Cancelled entries are consumed and
    /// skipped in a tight loop; they cost no asynchronous round-trip and
    /// invoke no callbacks. Releases the slot when the queue is empty.
    fn next_entry(&self, epoch: u64) -> Option<Entry> {
        let mut s = self.shared.state.lock();
        if s.epoch != epoch {
            return None;
        }
        loop {
            let Some(entry) = s.queue.pop_front() else {
                s.running = false;
                return None;
            };
            if s.cancelled.remove(&entry.id.0) {
                trace!(scheduler = %self.shared.name, id = %entry.id, "cancelled before start, skipped");
                continue;
            }
            s.live.insert(entry.id.0);
            return Some(entry);
        }
    }

    /// Rule on an outcome that is ready to dispatch. Consumes the item's
    /// cancellation mark, if any; this is the cancellation check covering
    /// the window between pop and completion.
    fn settle_verdict(&self, id: WorkId, epoch: u64) -> Verdict {
        let mut s = self.shared.state.lock();
        if s.epoch != epoch {
            return Verdict::Stale;
        }
        s.live.remove(&id.0);
        if s.cancelled.remove(&id.0) {
            Verdict::Suppressed
        } else {
            Verdict::Deliver
        }
    }

    /// Spawn the settlement watcher for a deferred result. With `wait` set,
    /// the watcher owns advancing the queue after delivery; fire-and-forget
    /// watchers never touch the slot.
    fn watch(&self, id: WorkId, epoch: u64, outcome: BoxFuture<'static, Deliver>, wait: bool) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let deliver = outcome.await;
            match scheduler.settle_verdict(id, epoch) {
                Verdict::Deliver => deliver(),
                Verdict::Suppressed => {
                    debug!(scheduler = %scheduler.shared.name, %id, "cancelled in flight, outcome discarded");
                }
                // The generation is gone; dropping the dispatch is the whole point.
                Verdict::Stale => return,
            }
            if wait {
                let resume = {
                    let mut s = scheduler.shared.state.lock();
                    if s.epoch == epoch {
                        s.running = false;
                        true
                    } else {
                        false
                    }
                };
                if resume {
                    scheduler.pump();
                }
            }
        });
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("name", &self.shared.name)
            .field("pending", &s.queue.len())
            .field("running", &s.running)
            .field("epoch", &s.epoch)
            .finish()
    }
}
