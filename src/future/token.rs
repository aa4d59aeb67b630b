//! Future-returning completion tokens.
//!
//! An asynchronous operation that reports completion by invoking a
//! callback can instead hand back a [`FutureHandle`]: the caller passes
//! the [`UseFuture`] token, the framework synthesizes one of the handler
//! shapes below in place of the callback, and an [`AsyncResult`] built
//! from that handler yields the future.
//!
//! # Handler shapes
//!
//! The leading callback argument decides how completion maps onto the
//! future:
//!
//! - [`ValueHandler`]: no special leading argument; invocation always
//!   fulfils with the value.
//! - [`CodeHandler`]: leading system error code; non-zero fails the future
//!   with [`Failure::Code`], zero fulfils with the value.
//! - [`CatchHandler`]: leading captured failure; `Some` fails the future
//!   with it, `None` fulfils with the value.
//! - [`PackagedHandler`]: wraps a user callable; a normal return fulfils
//!   with its result, an unwind fails with [`Failure::Panic`].
//!
//! # Value packing
//!
//! Rust has no variadics, so the callback's remaining arguments arrive
//! pre-packed as the handler's value type: instantiate with `()` for a
//! zero-argument completion, with `T` for one argument, and with a tuple
//! for two or more.
//!
//! Each handler completes its future at most once; `call` consumes the
//! handler, and a completion racing against the executor's failure path
//! is resolved by the handoff (first writer wins).

use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

use super::handoff::{handoff, Failure, FutureHandle, PanicPayload, Promise};
use super::invoker::PromiseExecutor;

/// Completion token requesting a future-returning operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UseFuture;

/// The [`UseFuture`] token as a value, for passing directly to initiating
/// functions.
pub const USE_FUTURE: UseFuture = UseFuture;

impl UseFuture {
    /// Packages a callable with the token: the synthesized handler will
    /// run `func` on completion and fulfil the future with its return
    /// value (or the captured unwind).
    #[must_use]
    pub fn package<F>(self, func: F) -> Packaged<F> {
        Packaged { func }
    }
}

/// A callable packaged with the future token. See [`UseFuture::package`].
#[derive(Clone, Copy)]
pub struct Packaged<F> {
    func: F,
}

impl<F> fmt::Debug for Packaged<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packaged").finish_non_exhaustive()
    }
}

/// Promise plus the not-yet-claimed future half, shared by every handler
/// shape.
struct Channel<T> {
    promise: Promise<T>,
    future: Mutex<Option<FutureHandle<T>>>,
}

impl<T> Channel<T> {
    fn new() -> Self {
        let (promise, future) = handoff();
        Self {
            promise,
            future: Mutex::new(Some(future)),
        }
    }

    fn take_future(&self) -> FutureHandle<T> {
        self.future
            .lock()
            .take()
            .expect("future already claimed from this handler")
    }
}

/// A completion handler synthesized from the [`UseFuture`] token.
///
/// Exposes the future half (claimed once, at [`AsyncResult`] construction)
/// and an executor bound to the handler's promise.
pub trait FutureHandler {
    /// The future's value type.
    type Output;

    /// Claims the future half. Panics if already claimed.
    fn take_future(&self) -> FutureHandle<Self::Output>;

    /// An executor whose inline work is bound to this handler's promise.
    fn executor(&self) -> PromiseExecutor<Self::Output>;
}

/// Handler for completions with no error argument: always fulfils.
pub struct ValueHandler<V> {
    channel: Channel<V>,
}

impl<V> ValueHandler<V> {
    /// Synthesizes the handler from the token.
    #[must_use]
    pub fn new(_token: UseFuture) -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Delivers the completion value.
    pub fn call(self, value: V) {
        if self.channel.promise.fulfil(value).is_err() {
            debug!("completion delivered to an already-completed future");
        }
    }
}

impl<V> FutureHandler for ValueHandler<V> {
    type Output = V;

    fn take_future(&self) -> FutureHandle<V> {
        self.channel.take_future()
    }

    fn executor(&self) -> PromiseExecutor<V> {
        PromiseExecutor::new(self.channel.promise.clone())
    }
}

impl<V> fmt::Debug for ValueHandler<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueHandler").finish_non_exhaustive()
    }
}

/// Handler for completions whose leading argument is a system error code.
pub struct CodeHandler<V> {
    channel: Channel<V>,
}

impl<V> CodeHandler<V> {
    /// Synthesizes the handler from the token.
    #[must_use]
    pub fn new(_token: UseFuture) -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Delivers the completion: a non-zero `code` fails the future with a
    /// system-error failure wrapping it, zero fulfils with `value`.
    pub fn call(self, code: i32, value: V) {
        let delivered = if code == 0 {
            self.channel.promise.fulfil(value).is_ok()
        } else {
            self.channel.promise.fail(Failure::Code(code)).is_ok()
        };
        if !delivered {
            debug!(code, "completion delivered to an already-completed future");
        }
    }
}

impl<V> FutureHandler for CodeHandler<V> {
    type Output = V;

    fn take_future(&self) -> FutureHandle<V> {
        self.channel.take_future()
    }

    fn executor(&self) -> PromiseExecutor<V> {
        PromiseExecutor::new(self.channel.promise.clone())
    }
}

impl<V> fmt::Debug for CodeHandler<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeHandler").finish_non_exhaustive()
    }
}

/// Handler for completions whose leading argument is an already-captured
/// failure.
pub struct CatchHandler<V> {
    channel: Channel<V>,
}

impl<V> CatchHandler<V> {
    /// Synthesizes the handler from the token.
    #[must_use]
    pub fn new(_token: UseFuture) -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Delivers the completion: `Some(failure)` fails the future with it,
    /// `None` fulfils with `value`.
    pub fn call(self, failure: Option<Failure>, value: V) {
        let delivered = match failure {
            Some(failure) => self.channel.promise.fail(failure).is_ok(),
            None => self.channel.promise.fulfil(value).is_ok(),
        };
        if !delivered {
            debug!("completion delivered to an already-completed future");
        }
    }
}

impl<V> FutureHandler for CatchHandler<V> {
    type Output = V;

    fn take_future(&self) -> FutureHandle<V> {
        self.channel.take_future()
    }

    fn executor(&self) -> PromiseExecutor<V> {
        PromiseExecutor::new(self.channel.promise.clone())
    }
}

impl<V> fmt::Debug for CatchHandler<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatchHandler").finish_non_exhaustive()
    }
}

/// Handler wrapping a user callable: invocation forwards the packed
/// arguments to the callable and fulfils the future with its result.
pub struct PackagedHandler<F, A, R> {
    func: F,
    channel: Channel<R>,
    _args: PhantomData<fn(A) -> R>,
}

impl<F, A, R> PackagedHandler<F, A, R>
where
    F: FnOnce(A) -> R,
{
    /// Synthesizes the handler from a packaged token.
    #[must_use]
    pub fn new(token: Packaged<F>) -> Self {
        Self {
            func: token.func,
            channel: Channel::new(),
            _args: PhantomData,
        }
    }

    /// Runs the packaged callable with the packed arguments. A normal
    /// return fulfils the future; an unwind is captured and fails it.
    pub fn call(self, args: A) {
        let func = self.func;
        let delivered = match catch_unwind(AssertUnwindSafe(move || func(args))) {
            Ok(value) => self.channel.promise.fulfil(value).is_ok(),
            Err(payload) => self
                .channel
                .promise
                .fail(Failure::Panic(PanicPayload::new(payload)))
                .is_ok(),
        };
        if !delivered {
            debug!("completion delivered to an already-completed future");
        }
    }
}

impl<F, A, R> FutureHandler for PackagedHandler<F, A, R> {
    type Output = R;

    fn take_future(&self) -> FutureHandle<R> {
        self.channel.take_future()
    }

    fn executor(&self) -> PromiseExecutor<R> {
        PromiseExecutor::new(self.channel.promise.clone())
    }
}

impl<F, A, R> fmt::Debug for PackagedHandler<F, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackagedHandler").finish_non_exhaustive()
    }
}

/// Captures the future half of a synthesized handler at construction and
/// yields it to the operation's initiator.
pub struct AsyncResult<H: FutureHandler> {
    future: FutureHandle<H::Output>,
}

impl<H: FutureHandler> AsyncResult<H> {
    /// Captures the future from `handler`.
    #[must_use]
    pub fn new(handler: &H) -> Self {
        Self {
            future: handler.take_future(),
        }
    }

    /// Yields the captured future.
    #[must_use]
    pub fn get(self) -> FutureHandle<H::Output> {
        self.future
    }
}

impl<H: FutureHandler> fmt::Debug for AsyncResult<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("future", &self.future)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::handoff::WaitError;
    use std::thread;

    #[test]
    fn value_handler_unit_shape() {
        let handler = ValueHandler::<()>::new(USE_FUTURE);
        let future = AsyncResult::new(&handler).get();

        handler.call(());
        future.wait().expect("unit completion");
    }

    #[test]
    fn value_handler_single_value_shape() {
        let handler = ValueHandler::<i32>::new(USE_FUTURE);
        let future = AsyncResult::new(&handler).get();

        handler.call(17);
        assert_eq!(future.wait().expect("value"), 17);
    }

    #[test]
    fn value_handler_tuple_shape() {
        let handler = ValueHandler::<(i32, String)>::new(USE_FUTURE);
        let future = AsyncResult::new(&handler).get();

        handler.call((5, "five".to_string()));
        let (number, text) = future.wait().expect("tuple");
        assert_eq!(number, 5);
        assert_eq!(text, "five");
    }

    #[test]
    fn code_handler_zero_code_fulfils() {
        let handler = CodeHandler::<u64>::new(USE_FUTURE);
        let future = AsyncResult::new(&handler).get();

        handler.call(0, 99);
        assert_eq!(future.wait().expect("value"), 99);
    }

    #[test]
    fn code_handler_nonzero_code_fails() {
        let handler = CodeHandler::<u64>::new(USE_FUTURE);
        let future = AsyncResult::new(&handler).get();

        handler.call(42, 99);
        match future.wait().expect_err("failure") {
            WaitError::Failed(failure) => assert_eq!(failure.code(), Some(42)),
            other => panic!("expected code failure, got {other:?}"),
        }
    }

    #[test]
    fn catch_handler_none_fulfils() {
        let handler = CatchHandler::<i32>::new(USE_FUTURE);
        let future = AsyncResult::new(&handler).get();

        handler.call(None, 8);
        assert_eq!(future.wait().expect("value"), 8);
    }

    #[test]
    fn catch_handler_some_fails_with_the_capture() {
        let handler = CatchHandler::<i32>::new(USE_FUTURE);
        let future = AsyncResult::new(&handler).get();

        handler.call(Some(Failure::Message("captured".to_string())), 8);
        match future.wait().expect_err("failure") {
            WaitError::Failed(Failure::Message(msg)) => assert_eq!(msg, "captured"),
            other => panic!("expected message failure, got {other:?}"),
        }
    }

    #[test]
    fn packaged_handler_fulfils_with_return_value() {
        let token = USE_FUTURE.package(|(a, b): (i32, i32)| a + b);
        let handler = PackagedHandler::new(token);
        let future = AsyncResult::new(&handler).get();

        handler.call((20, 22));
        assert_eq!(future.wait().expect("sum"), 42);
    }

    #[test]
    fn packaged_handler_captures_unwind_as_failure() {
        let token = USE_FUTURE.package(|(): ()| -> i32 { panic!("packaged blew up") });
        let handler = PackagedHandler::new(token);
        let future = AsyncResult::new(&handler).get();

        handler.call(());
        match future.wait().expect_err("failure") {
            WaitError::Failed(Failure::Panic(payload)) => {
                assert_eq!(payload.describe(), "packaged blew up");
            }
            other => panic!("expected panic failure, got {other:?}"),
        }
    }

    #[test]
    fn handler_completes_from_another_thread() {
        let handler = CodeHandler::<i32>::new(USE_FUTURE);
        let future = AsyncResult::new(&handler).get();

        let completer = thread::spawn(move || handler.call(0, 11));
        assert_eq!(future.wait().expect("value"), 11);
        completer.join().expect("completer thread");
    }

    #[test]
    fn executors_compare_equal_only_on_the_same_promise() {
        let first = ValueHandler::<i32>::new(USE_FUTURE);
        let second = ValueHandler::<i32>::new(USE_FUTURE);

        assert_eq!(first.executor(), first.executor());
        assert_ne!(first.executor(), second.executor());
    }

    #[test]
    #[should_panic(expected = "future already claimed")]
    fn future_can_only_be_claimed_once() {
        let handler = ValueHandler::<i32>::new(USE_FUTURE);
        let _first = AsyncResult::new(&handler);
        let _second = AsyncResult::new(&handler);
    }
}
