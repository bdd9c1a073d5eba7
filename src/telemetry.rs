//! Structured logging setup.

use tracing_subscriber::EnvFilter;

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Install the default env-filtered subscriber.
///
/// Does nothing if a global subscriber is already set, so embedders can
/// install their own and tests can call this repeatedly.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_FILTER);
}

/// Like [`init_tracing`], with `fallback` used when `RUST_LOG` is unset.
pub fn init_tracing_with(fallback: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
