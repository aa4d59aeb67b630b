//! The scheduler: a thread-safe FIFO work queue with worker-blocking
//! semantics.
//!
//! Producers hand callables to [`Scheduler::post`] or
//! [`Scheduler::dispatch`]; worker threads drain them with the
//! [`run`](Scheduler::run)/[`poll`](Scheduler::poll) family. The scheduler
//! counts outstanding work and stops itself when the count reaches zero;
//! [`restart`](Scheduler::restart) re-arms it for another round.
//!
//! ```
//! use taskmill::Scheduler;
//!
//! let sched = Scheduler::single_thread();
//! sched.post(|| {});
//! assert_eq!(sched.run(), 1);
//! assert!(sched.stopped());
//! ```
//!
//! # Concurrency
//!
//! Any number of threads may call any operation concurrently. A scheduler
//! built with a concurrency hint of 1 promises at most one running thread
//! in exchange for the reentrant-post fast path: posts made from inside a
//! running callable go to a thread-private queue and are spliced back
//! between operations, once per completed operation instead of once per
//! post.

mod call_stack;
mod metrics;

pub use metrics::MetricsSnapshot;

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::op::operation::Operation;
use crate::op::queue::OpQueue;
use call_stack::{CallStackEntry, PrivateQueue};
use metrics::SchedulerMetrics;

/// State guarded by the scheduler mutex.
struct SchedState {
    queue: OpQueue,
    stopped: bool,
}

/// Shared scheduler core. Handles ([`Scheduler`], [`WorkToken`], queued
/// operations) reference it through `Arc`/`Weak`.
struct Core {
    state: Mutex<SchedState>,
    ready: Condvar,
    outstanding: AtomicUsize,
    one_thread: bool,
    metrics: SchedulerMetrics,
}

impl Core {
    fn new(one_thread: bool) -> Self {
        Self {
            state: Mutex::new(SchedState {
                queue: OpQueue::new(),
                stopped: false,
            }),
            ready: Condvar::new(),
            outstanding: AtomicUsize::new(0),
            one_thread,
            metrics: SchedulerMetrics::default(),
        }
    }

    /// Identity of this scheduler for reentrancy lookups.
    fn key(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    fn work_started(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    fn work_finished(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Last unit of work gone: stop promptly so blocked workers
            // wake and return.
            self.stop();
        }
    }

    fn enqueue(self: &Arc<Self>, op: Box<dyn Operation>) {
        if self.one_thread {
            if let Some(private) = call_stack::top_queue(self.key()) {
                // Reentrant post on the single running thread: stash it
                // locally, no lock, no wake-up. The owning run splices
                // before it next blocks.
                private.borrow_mut().push(op);
                self.metrics.record_private_push();
                trace!("post coalesced onto private queue");
                return;
            }
        }

        let mut state = self.state.lock();
        let was_empty = state.queue.is_empty();
        state.queue.push(op);
        self.metrics.record_global_push();
        if was_empty {
            self.ready.notify_one();
            self.metrics.record_notify();
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if !state.stopped {
            debug!("scheduler stopped");
        }
        state.stopped = true;
        self.ready.notify_all();
    }

    fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    fn restart(&self) {
        let mut state = self.state.lock();
        if state.stopped {
            debug!("scheduler restarted");
        }
        state.stopped = false;
    }

    /// Blocking dequeue-and-complete. Requires the context lock held;
    /// releases it around the user callable.
    fn do_run_one(self: &Arc<Self>, ctx: &mut RunContext<'_>) -> usize {
        let op = {
            let lock = ctx.lock.as_mut().expect("run lock must be held");
            while lock.queue.is_empty() && !lock.stopped {
                self.ready.wait(lock);
            }
            if lock.stopped {
                return 0;
            }
            self.dequeue_locked(lock)
        };
        ctx.unlock();
        op.complete();
        self.metrics.record_completed();
        1
    }

    /// Like [`do_run_one`](Core::do_run_one) but gives up at `deadline`.
    fn do_run_one_until(
        self: &Arc<Self>,
        ctx: &mut RunContext<'_>,
        deadline: Instant,
    ) -> usize {
        let op = {
            let lock = ctx.lock.as_mut().expect("run lock must be held");
            if Instant::now() >= deadline {
                return 0;
            }
            while lock.queue.is_empty() && !lock.stopped {
                if self.ready.wait_until(lock, deadline).timed_out() {
                    return 0;
                }
            }
            if lock.stopped {
                return 0;
            }
            self.dequeue_locked(lock)
        };
        ctx.unlock();
        op.complete();
        self.metrics.record_completed();
        1
    }

    /// Non-blocking dequeue-and-complete.
    fn do_poll_one(self: &Arc<Self>, ctx: &mut RunContext<'_>) -> usize {
        let op = {
            let lock = ctx.lock.as_mut().expect("run lock must be held");
            if lock.queue.is_empty() || lock.stopped {
                return 0;
            }
            self.dequeue_locked(lock)
        };
        ctx.unlock();
        op.complete();
        self.metrics.record_completed();
        1
    }

    fn dequeue_locked(&self, lock: &mut MutexGuard<'_, SchedState>) -> Box<dyn Operation> {
        let op = lock.queue.pop().expect("queue checked non-empty");
        if !self.one_thread && !lock.queue.is_empty() {
            // More work remains: wake another worker so it can start
            // draining while this one runs the popped operation.
            self.ready.notify_one();
            self.metrics.record_notify();
        }
        op
    }
}

/// Per-run state held on a worker's stack for the duration of one
/// `run`/`poll` call: the reentrancy registration, the thread-private
/// queue, and the scheduler lock.
struct RunContext<'a> {
    core: &'a Arc<Core>,
    private: PrivateQueue,
    lock: Option<MutexGuard<'a, SchedState>>,
    _entry: CallStackEntry,
}

impl<'a> RunContext<'a> {
    fn new(core: &'a Arc<Core>) -> Self {
        let private: PrivateQueue = Rc::new(RefCell::new(OpQueue::new()));
        let entry = CallStackEntry::push(core.key(), Rc::clone(&private));
        let lock = Some(core.state.lock());
        Self {
            core,
            private,
            lock,
            _entry: entry,
        }
    }

    /// Reacquires the scheduler lock if released and splices any
    /// reentrant posts back onto the global queue.
    fn relock(&mut self) {
        if self.lock.is_none() {
            self.lock = Some(self.core.state.lock());
        }
        let mut private = self.private.borrow_mut();
        if !private.is_empty() {
            if let Some(lock) = self.lock.as_mut() {
                lock.queue.append(&mut private);
            }
        }
    }

    fn unlock(&mut self) {
        self.lock = None;
    }
}

impl Drop for RunContext<'_> {
    fn drop(&mut self) {
        // Runs were exited (possibly by unwind out of a user callable)
        // with reentrant posts still pending: splice them back so no
        // work is lost.
        if !self.private.borrow().is_empty() {
            self.relock();
        }
    }
}

/// Outstanding-work token.
///
/// Holding one keeps the scheduler's work count positive, so `run` blocks
/// for more work instead of stopping when the queue drains. Dropping the
/// token releases the unit of work; dropping the last unit stops the
/// scheduler. Tokens survive the scheduler: once the scheduler is gone
/// they become inert.
pub struct WorkToken {
    core: Weak<Core>,
}

impl WorkToken {
    fn new(core: &Arc<Core>) -> Self {
        core.work_started();
        Self {
            core: Arc::downgrade(core),
        }
    }
}

impl Clone for WorkToken {
    fn clone(&self) -> Self {
        if let Some(core) = self.core.upgrade() {
            core.work_started();
        }
        Self {
            core: Weak::clone(&self.core),
        }
    }
}

impl Drop for WorkToken {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            core.work_finished();
        }
    }
}

impl fmt::Debug for WorkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkToken")
            .field("live", &(self.core.strong_count() > 0))
            .finish()
    }
}

/// A posted callable wrapped as an [`Operation`].
///
/// Construction counts a unit of outstanding work; completing or
/// destroying the operation releases it exactly once, via the embedded
/// token's `Drop`.
struct TaskOp<F: FnOnce() + Send> {
    func: F,
    work: WorkToken,
}

impl<F: FnOnce() + Send> TaskOp<F> {
    fn new(func: F, core: &Arc<Core>) -> Self {
        Self {
            func,
            work: WorkToken::new(core),
        }
    }
}

impl<F: FnOnce() + Send> Operation for TaskOp<F> {
    fn complete(self: Box<Self>) {
        // Move out of the heap slot so it is freed before the callable
        // runs. The token stays live across the call: this operation
        // still counts as outstanding work while it executes, and the
        // accounting settles when the frame exits, unwind included.
        let TaskOp { func, work } = *self;
        let _work = work;
        func();
    }
}

/// The thread-safe work-queue scheduler.
///
/// `Scheduler` is a cheap clonable handle; clones share one queue and one
/// work count.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<Core>,
}

impl Scheduler {
    /// Creates a scheduler with the given concurrency hint.
    ///
    /// The hint is opaque except for one bit: a hint of exactly 1 enables
    /// the single-thread reentrancy optimization and suppresses redundant
    /// wake-ups. With that hint the caller promises that at most one
    /// thread runs the scheduler at a time.
    #[must_use]
    pub fn new(concurrency_hint: usize) -> Self {
        Self {
            core: Arc::new(Core::new(concurrency_hint == 1)),
        }
    }

    /// Creates a scheduler from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the configuration does not validate.
    pub fn with_config(config: &SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.concurrency_hint))
    }

    /// Creates a scheduler for exactly one running thread.
    #[must_use]
    pub fn single_thread() -> Self {
        Self::new(1)
    }

    /// Enqueues `func` to run on a worker thread.
    ///
    /// The callable counts as outstanding work from this call until it has
    /// run (or the scheduler is dropped with it still queued). On a
    /// single-thread scheduler, posting from inside a running callable
    /// takes a lock-free thread-private fast path.
    pub fn post<F>(&self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let op = Box::new(TaskOp::new(func, &self.core));
        self.core.enqueue(op);
    }

    /// Runs `func` inline if the calling thread is already running this
    /// scheduler; otherwise posts it.
    ///
    /// Inline execution keeps strict ordering with the caller's frame:
    /// `func` finishes before `dispatch` returns.
    pub fn dispatch<F>(&self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if call_stack::is_inside(self.core.key()) {
            trace!("dispatch running inline");
            func();
        } else {
            self.post(func);
        }
    }

    /// Runs operations until the scheduler stops, blocking for more work
    /// while the work count is positive. Returns the number of operations
    /// run (saturating).
    pub fn run(&self) -> usize {
        if self.core.outstanding.load(Ordering::SeqCst) == 0 {
            self.core.stop();
            return 0;
        }
        let mut ctx = RunContext::new(&self.core);
        let mut n: usize = 0;
        while self.core.do_run_one(&mut ctx) > 0 {
            n = n.saturating_add(1);
            ctx.relock();
        }
        n
    }

    /// Runs at most one operation, blocking for it if necessary.
    pub fn run_one(&self) -> usize {
        if self.core.outstanding.load(Ordering::SeqCst) == 0 {
            self.core.stop();
            return 0;
        }
        let mut ctx = RunContext::new(&self.core);
        self.core.do_run_one(&mut ctx)
    }

    /// Like [`run`](Scheduler::run), but gives up `timeout` from now.
    ///
    /// An operation already in progress is never interrupted; the deadline
    /// only bounds the wait for further work.
    pub fn run_for(&self, timeout: Duration) -> usize {
        self.run_until(Instant::now() + timeout)
    }

    /// Like [`run`](Scheduler::run), but gives up at `deadline`.
    ///
    /// Returns 0 immediately when the deadline is already past.
    pub fn run_until(&self, deadline: Instant) -> usize {
        if self.core.outstanding.load(Ordering::SeqCst) == 0 {
            self.core.stop();
            return 0;
        }
        let mut ctx = RunContext::new(&self.core);
        let mut n: usize = 0;
        while self.core.do_run_one_until(&mut ctx, deadline) > 0 {
            n = n.saturating_add(1);
            ctx.relock();
        }
        n
    }

    /// Runs all currently-ready operations without blocking and returns
    /// how many ran.
    pub fn poll(&self) -> usize {
        if self.core.outstanding.load(Ordering::SeqCst) == 0 {
            self.core.stop();
            return 0;
        }
        let mut ctx = RunContext::new(&self.core);
        let mut n: usize = 0;
        while self.core.do_poll_one(&mut ctx) > 0 {
            n = n.saturating_add(1);
            ctx.relock();
        }
        n
    }

    /// Runs at most one ready operation without blocking.
    pub fn poll_one(&self) -> usize {
        if self.core.outstanding.load(Ordering::SeqCst) == 0 {
            self.core.stop();
            return 0;
        }
        let mut ctx = RunContext::new(&self.core);
        self.core.do_poll_one(&mut ctx)
    }

    /// Stops the scheduler: wakes all blocked workers, which return
    /// without running further operations. Queued operations are kept;
    /// [`restart`](Scheduler::restart) followed by `run` resumes draining
    /// them. Idempotent.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Returns true if the scheduler is stopped.
    #[must_use]
    pub fn stopped(&self) -> bool {
        self.core.is_stopped()
    }

    /// Clears the stopped flag so the scheduler can run again. Does not
    /// touch the outstanding-work count.
    pub fn restart(&self) {
        self.core.restart();
    }

    /// Takes a unit of outstanding work, keeping the scheduler running
    /// while the token is held.
    #[must_use]
    pub fn work_token(&self) -> WorkToken {
        WorkToken::new(&self.core)
    }

    /// Current count of outstanding work units.
    #[must_use]
    pub fn outstanding_work(&self) -> usize {
        self.core.outstanding.load(Ordering::SeqCst)
    }

    /// Snapshot of the scheduler's instrumentation counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Returns true if this scheduler was configured for a single running
    /// thread.
    #[must_use]
    pub fn is_single_thread(&self) -> bool {
        self.core.one_thread
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default().concurrency_hint)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("outstanding_work", &self.outstanding_work())
            .field("one_thread", &self.core.one_thread)
            .field("stopped", &self.stopped())
            .finish_non_exhaustive()
    }
}
