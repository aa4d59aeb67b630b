//! Shared test support.

#![allow(dead_code)]

use std::sync::Once;

/// Installs the test tracing subscriber once per test binary.
///
/// Verbosity is controlled through `RUST_LOG`, e.g.
/// `RUST_LOG=taskmill=trace cargo test -- --nocapture`.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
