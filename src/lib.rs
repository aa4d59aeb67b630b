//! taskmill: a thread-safe task execution engine.
//!
//! The heart of the crate is the [`Scheduler`]: a FIFO work queue into
//! which callables are [`post`](Scheduler::post)ed and from which worker
//! threads drain them with the blocking [`run`](Scheduler::run) family or
//! the non-blocking [`poll`](Scheduler::poll) family. The scheduler
//! counts outstanding work, stops itself when the count reaches zero, and
//! can be [`restart`](Scheduler::restart)ed for another round. A
//! scheduler configured for a single running thread coalesces reentrant
//! posts onto a thread-private queue, paying one lock cycle per completed
//! operation instead of one per post.
//!
//! On top of the scheduler sit the future-returning completion tokens
//! ([`future::token`]): an asynchronous operation that would invoke a
//! callback can instead hand back a [`FutureHandle`] — a one-shot
//! single-producer/single-consumer handoff that the caller waits on.
//!
//! ```
//! use taskmill::{Scheduler, SchedulerConfig};
//!
//! let sched = Scheduler::with_config(&SchedulerConfig::single_thread())?;
//! let (promise, future) = taskmill::future::handoff();
//!
//! sched.post(move || {
//!     let _ = promise.fulfil(6 * 7);
//! });
//!
//! assert_eq!(sched.run(), 1);
//! assert_eq!(future.wait().unwrap(), 42);
//! # Ok::<(), taskmill::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod future;
pub mod op;
pub mod sched;
pub mod system;

pub use config::SchedulerConfig;
pub use error::{Error, ErrorKind, Result};
pub use future::handoff::{Failure, FutureHandle, Promise};
pub use future::token::{AsyncResult, UseFuture, USE_FUTURE};
pub use sched::{MetricsSnapshot, Scheduler, WorkToken};
