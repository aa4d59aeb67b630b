//! The ambient system executor.
//!
//! A process-wide pool of worker threads draining a shared [`Scheduler`].
//! The pool starts lazily on first use and holds a permanent work token,
//! so its workers block for work instead of stopping when the queue runs
//! dry. Promise executors delegate their `post`/`defer` here.

use std::sync::OnceLock;
use std::thread;
use tracing::debug;

use crate::sched::{Scheduler, WorkToken};

struct SystemContext {
    scheduler: Scheduler,
    _work: WorkToken,
}

static CONTEXT: OnceLock<SystemContext> = OnceLock::new();

fn context() -> &'static SystemContext {
    CONTEXT.get_or_init(|| {
        let threads = thread::available_parallelism().map_or(1, usize::from);
        let scheduler = Scheduler::new(threads);
        let work = scheduler.work_token();
        for index in 0..threads {
            let worker = scheduler.clone();
            thread::Builder::new()
                .name(format!("taskmill-system-{index}"))
                .spawn(move || {
                    worker.run();
                })
                .expect("failed to spawn system executor thread");
        }
        debug!(threads, "system executor started");
        SystemContext {
            scheduler,
            _work: work,
        }
    })
}

/// Handle to the process-wide system executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

/// Returns a handle to the system executor, starting the pool on first
/// use.
#[must_use]
pub fn executor() -> SystemExecutor {
    SystemExecutor
}

impl SystemExecutor {
    /// Queues `func` to run on a pool thread.
    pub fn post<F>(self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        context().scheduler.post(func);
    }

    /// Queues `func` to run on a pool thread. `defer` is a scheduling
    /// hint; the system pool treats it like `post`.
    pub fn defer<F>(self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        context().scheduler.post(func);
    }

    /// Runs `func` inline when called from a pool thread, otherwise
    /// queues it.
    pub fn dispatch<F>(self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        context().scheduler.dispatch(func);
    }
}
