//! Executor bound to a handler's promise.
//!
//! Continuation-like work attached to a future-returning operation runs
//! through this executor: inline dispatch wraps the closure so an unwind
//! fails the promise instead of tearing down the caller, while `post` and
//! `defer` hand the wrapped closure to the ambient system executor.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

use super::handoff::{Failure, PanicPayload, Promise};
use crate::system;

/// A closure bound to a promise: if the closure unwinds, the promise is
/// failed with the captured payload.
pub struct PromiseInvoker<T, F> {
    promise: Promise<T>,
    func: F,
}

impl<T, F> PromiseInvoker<T, F>
where
    F: FnOnce(),
{
    /// Binds `func` to `promise`.
    #[must_use]
    pub fn new(promise: Promise<T>, func: F) -> Self {
        Self { promise, func }
    }

    /// Runs the closure, converting an unwind into a promise failure.
    pub fn invoke(self) {
        let Self { promise, func } = self;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(func)) {
            if promise
                .fail(Failure::Panic(PanicPayload::new(payload)))
                .is_err()
            {
                debug!("invoker unwind after the future already completed");
            }
        }
    }
}

impl<T, F> fmt::Debug for PromiseInvoker<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseInvoker").finish_non_exhaustive()
    }
}

/// Executor associated with a future-returning completion handler.
///
/// Two promise executors compare equal exactly when they reference the
/// same underlying promise.
pub struct PromiseExecutor<T> {
    promise: Promise<T>,
}

impl<T> PromiseExecutor<T> {
    pub(crate) fn new(promise: Promise<T>) -> Self {
        Self { promise }
    }

    /// Runs `func` inline, failing the bound promise if it unwinds.
    pub fn dispatch<F>(&self, func: F)
    where
        F: FnOnce(),
    {
        PromiseInvoker::new(self.promise.clone(), func).invoke();
    }

    /// Queues `func` on the system executor, bound to this promise.
    pub fn post<F>(&self, func: F)
    where
        F: FnOnce() + Send + 'static,
        T: Send + 'static,
    {
        let invoker = PromiseInvoker::new(self.promise.clone(), func);
        system::executor().post(move || invoker.invoke());
    }

    /// Like [`post`](PromiseExecutor::post); `defer` is a scheduling hint
    /// and the system executor treats both alike.
    pub fn defer<F>(&self, func: F)
    where
        F: FnOnce() + Send + 'static,
        T: Send + 'static,
    {
        let invoker = PromiseInvoker::new(self.promise.clone(), func);
        system::executor().defer(move || invoker.invoke());
    }
}

impl<T> Clone for PromiseExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T> PartialEq for PromiseExecutor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.promise.same_channel(&other.promise)
    }
}

impl<T> Eq for PromiseExecutor<T> {}

impl<T> fmt::Debug for PromiseExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseExecutor")
            .field("promise", &self.promise)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::handoff::{handoff, WaitError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_runs_inline() {
        let (promise, _future) = handoff::<i32>();
        let executor = PromiseExecutor::new(promise);

        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = Arc::clone(&ran);
            executor.dispatch(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1, "dispatch must not queue");
    }

    #[test]
    fn dispatch_unwind_fails_the_promise() {
        let (promise, future) = handoff::<i32>();
        let executor = PromiseExecutor::new(promise);

        executor.dispatch(|| panic!("continuation failed"));

        match future.wait().expect_err("failure") {
            WaitError::Failed(Failure::Panic(payload)) => {
                assert_eq!(payload.describe(), "continuation failed");
            }
            other => panic!("expected panic failure, got {other:?}"),
        }
    }

    #[test]
    fn unwind_after_completion_keeps_the_first_outcome() {
        let (promise, future) = handoff::<i32>();
        let executor = PromiseExecutor::new(promise.clone());

        promise.fulfil(5).expect("completion");
        executor.dispatch(|| panic!("late failure"));

        assert_eq!(future.wait().expect("first outcome kept"), 5);
    }

    #[test]
    fn invoker_runs_the_closure_once() {
        let (promise, _future) = handoff::<()>();
        let count = Arc::new(AtomicUsize::new(0));
        let invoker = {
            let count = Arc::clone(&count);
            PromiseInvoker::new(promise, move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        invoker.invoke();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn equality_is_promise_identity() {
        let (promise, _future) = handoff::<i32>();
        let a = PromiseExecutor::new(promise.clone());
        let b = a.clone();
        let (other_promise, _other_future) = handoff::<i32>();
        let c = PromiseExecutor::new(other_promise);

        assert_eq!(a, b);
        assert_ne!(a, c);
        drop(promise);
    }
}
