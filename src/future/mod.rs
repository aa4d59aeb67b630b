//! Deferred results: the one-shot handoff and the future-returning
//! completion tokens built on top of it.

pub mod handoff;
pub mod invoker;
pub mod token;

pub use handoff::{handoff, Failure, FutureHandle, PanicPayload, Promise};
pub use invoker::{PromiseExecutor, PromiseInvoker};
pub use token::{
    AsyncResult, CatchHandler, CodeHandler, FutureHandler, Packaged, PackagedHandler, UseFuture,
    ValueHandler, USE_FUTURE,
};
