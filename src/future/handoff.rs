//! One-shot single-producer/single-consumer handoff.
//!
//! A handoff transitions exactly once from empty to either a value or a
//! [`Failure`]; the consumer then retrieves and consumes that outcome.
//! The producer side ([`Promise`]) may be shared (cloned) so an executor
//! can fail the handoff on behalf of a crashing completion, but only the
//! first completion wins; later ones get a [`SetError`] back.
//!
//! Consumers are plain threads, so the consumer side ([`FutureHandle`])
//! blocks on a condition variable rather than registering a task waker.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::io;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A captured panic payload, carried across threads.
pub struct PanicPayload(Box<dyn Any + Send>);

impl PanicPayload {
    /// Wraps a payload captured by `std::panic::catch_unwind`.
    #[must_use]
    pub fn new(payload: Box<dyn Any + Send>) -> Self {
        Self(payload)
    }

    /// Best-effort description of the payload (panic message strings are
    /// recovered; anything else is opaque).
    #[must_use]
    pub fn describe(&self) -> &str {
        if let Some(s) = self.0.downcast_ref::<&'static str>() {
            s
        } else if let Some(s) = self.0.downcast_ref::<String>() {
            s
        } else {
            "opaque panic payload"
        }
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn into_inner(self) -> Box<dyn Any + Send> {
        self.0
    }

    /// Resumes unwinding with this payload on the current thread.
    pub fn resume(self) -> ! {
        std::panic::resume_unwind(self.0)
    }
}

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PanicPayload").field(&self.describe()).finish()
    }
}

/// Why a handoff completed unsuccessfully.
#[derive(Debug)]
pub enum Failure {
    /// A system error code reported by the completing operation.
    Code(i32),
    /// The completing callable panicked; the payload survives the thread
    /// boundary.
    Panic(PanicPayload),
    /// An opaque failure described by a message.
    Message(String),
}

impl Failure {
    /// The system error code, if this failure carries one.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this failure is a captured panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panic(_))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => {
                write!(f, "system error {code}: {}", io::Error::from_raw_os_error(*code))
            }
            Self::Panic(payload) => write!(f, "task panicked: {}", payload.describe()),
            Self::Message(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Failure {}

/// Error returned when completing a handoff fails. Carries the rejected
/// payload back to the caller.
#[derive(Debug)]
pub enum SetError<P> {
    /// The handoff already holds an outcome (or it was already consumed).
    AlreadyCompleted(P),
    /// The consumer is gone; nobody will ever observe the outcome.
    Disconnected(P),
}

impl<P> SetError<P> {
    /// Returns the rejected payload.
    pub fn into_inner(self) -> P {
        match self {
            Self::AlreadyCompleted(payload) | Self::Disconnected(payload) => payload,
        }
    }
}

impl<P> fmt::Display for SetError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyCompleted(_) => write!(f, "handoff already completed"),
            Self::Disconnected(_) => write!(f, "handoff consumer is gone"),
        }
    }
}

impl<P: fmt::Debug> std::error::Error for SetError<P> {}

/// Error returned when waiting on a handoff fails.
#[derive(Debug)]
pub enum WaitError {
    /// The handoff completed with a failure.
    Failed(Failure),
    /// Every producer is gone without completing (or the outcome was
    /// already consumed).
    Disconnected,
    /// The deadline elapsed with the handoff still empty.
    Timeout,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(failure) => write!(f, "{failure}"),
            Self::Disconnected => write!(f, "waiting on a broken handoff"),
            Self::Timeout => write!(f, "handoff wait timed out"),
        }
    }
}

impl std::error::Error for WaitError {}

/// Error returned by a non-blocking probe of a handoff.
#[derive(Debug)]
pub enum TryTakeError {
    /// The handoff completed with a failure.
    Failed(Failure),
    /// Every producer is gone without completing (or the outcome was
    /// already consumed).
    Disconnected,
    /// No outcome yet, but a producer still exists.
    Empty,
}

impl fmt::Display for TryTakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(failure) => write!(f, "{failure}"),
            Self::Disconnected => write!(f, "probing a broken handoff"),
            Self::Empty => write!(f, "handoff is empty"),
        }
    }
}

impl std::error::Error for TryTakeError {}

enum Slot<T> {
    Empty,
    Value(T),
    Failed(Failure),
    Taken,
}

struct State<T> {
    slot: Slot<T>,
    receiver_gone: bool,
    producers: usize,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// Creates a connected promise/future pair.
#[must_use]
pub fn handoff<T>() -> (Promise<T>, FutureHandle<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State {
            slot: Slot::Empty,
            receiver_gone: false,
            producers: 1,
        }),
        ready: Condvar::new(),
    });
    (
        Promise {
            inner: Arc::clone(&inner),
        },
        FutureHandle { inner },
    )
}

/// The producing half of a handoff.
///
/// Cloning shares the same underlying channel; the channel still completes
/// at most once. Dropping the last promise without completing fails the
/// consumer's wait with `Disconnected`.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Promise<T> {
    /// Completes the handoff with a value.
    ///
    /// # Errors
    ///
    /// Returns the value back if the handoff already completed or the
    /// consumer is gone.
    pub fn fulfil(&self, value: T) -> Result<(), SetError<T>> {
        let mut state = self.inner.state.lock();
        match state.slot {
            Slot::Empty => {
                if state.receiver_gone {
                    return Err(SetError::Disconnected(value));
                }
                state.slot = Slot::Value(value);
                drop(state);
                self.inner.ready.notify_one();
                Ok(())
            }
            _ => Err(SetError::AlreadyCompleted(value)),
        }
    }

    /// Completes the handoff with a failure.
    ///
    /// # Errors
    ///
    /// Returns the failure back if the handoff already completed or the
    /// consumer is gone.
    pub fn fail(&self, failure: Failure) -> Result<(), SetError<Failure>> {
        let mut state = self.inner.state.lock();
        match state.slot {
            Slot::Empty => {
                if state.receiver_gone {
                    return Err(SetError::Disconnected(failure));
                }
                state.slot = Slot::Failed(failure);
                drop(state);
                self.inner.ready.notify_one();
                Ok(())
            }
            _ => Err(SetError::AlreadyCompleted(failure)),
        }
    }

    /// Returns true if the consumer has been dropped.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.inner.state.lock().receiver_gone
    }

    /// Returns true if `other` completes the same handoff.
    #[must_use]
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        self.inner.state.lock().producers += 1;
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.producers -= 1;
        let broken = state.producers == 0 && matches!(state.slot, Slot::Empty);
        drop(state);
        if broken {
            debug!("promise dropped without completion");
            self.inner.ready.notify_one();
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Promise")
            .field("completed", &!matches!(state.slot, Slot::Empty))
            .field("producers", &state.producers)
            .finish()
    }
}

/// The consuming half of a handoff.
pub struct FutureHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> FutureHandle<T> {
    /// Blocks until the handoff completes and consumes the outcome.
    ///
    /// # Errors
    ///
    /// `Failed` carries the producer's failure; `Disconnected` means every
    /// producer vanished without completing.
    pub fn wait(self) -> Result<T, WaitError> {
        self.wait_deadline(None)
    }

    /// Like [`wait`](FutureHandle::wait) but gives up `timeout` from now.
    /// On `Timeout` the handle is unchanged and the wait can be retried.
    ///
    /// # Errors
    ///
    /// As [`wait`](FutureHandle::wait), plus `Timeout`.
    pub fn wait_for(&self, timeout: Duration) -> Result<T, WaitError> {
        self.wait_deadline(Some(Instant::now() + timeout))
    }

    /// Like [`wait_for`](FutureHandle::wait_for) with an absolute deadline.
    ///
    /// # Errors
    ///
    /// As [`wait_for`](FutureHandle::wait_for).
    pub fn wait_until(&self, deadline: Instant) -> Result<T, WaitError> {
        self.wait_deadline(Some(deadline))
    }

    fn wait_deadline(&self, deadline: Option<Instant>) -> Result<T, WaitError> {
        let mut state = self.inner.state.lock();
        loop {
            match state.slot {
                Slot::Value(_) | Slot::Failed(_) => {
                    return match mem::replace(&mut state.slot, Slot::Taken) {
                        Slot::Value(value) => Ok(value),
                        Slot::Failed(failure) => Err(WaitError::Failed(failure)),
                        Slot::Empty | Slot::Taken => unreachable!("slot checked ready"),
                    };
                }
                Slot::Taken => return Err(WaitError::Disconnected),
                Slot::Empty => {
                    if state.producers == 0 {
                        return Err(WaitError::Disconnected);
                    }
                    match deadline {
                        Some(deadline) => {
                            if self.inner.ready.wait_until(&mut state, deadline).timed_out() {
                                // The outcome may have landed exactly as the
                                // deadline expired; prefer it over Timeout.
                                if matches!(state.slot, Slot::Value(_) | Slot::Failed(_)) {
                                    continue;
                                }
                                return Err(WaitError::Timeout);
                            }
                        }
                        None => self.inner.ready.wait(&mut state),
                    }
                }
            }
        }
    }

    /// Consumes the outcome if one is ready, without blocking.
    ///
    /// # Errors
    ///
    /// `Empty` while producers exist and nothing has completed;
    /// otherwise as [`wait`](FutureHandle::wait).
    pub fn try_take(&self) -> Result<T, TryTakeError> {
        let mut state = self.inner.state.lock();
        match state.slot {
            Slot::Value(_) | Slot::Failed(_) => match mem::replace(&mut state.slot, Slot::Taken) {
                Slot::Value(value) => Ok(value),
                Slot::Failed(failure) => Err(TryTakeError::Failed(failure)),
                Slot::Empty | Slot::Taken => unreachable!("slot checked ready"),
            },
            Slot::Taken => Err(TryTakeError::Disconnected),
            Slot::Empty => {
                if state.producers == 0 {
                    Err(TryTakeError::Disconnected)
                } else {
                    Err(TryTakeError::Empty)
                }
            }
        }
    }

    /// Returns true if an outcome is ready to take.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(
            self.inner.state.lock().slot,
            Slot::Value(_) | Slot::Failed(_)
        )
    }
}

impl<T> Drop for FutureHandle<T> {
    fn drop(&mut self) {
        self.inner.state.lock().receiver_gone = true;
    }
}

impl<T> fmt::Debug for FutureHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}
