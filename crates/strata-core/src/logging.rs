//! Logging setup.
//!
//! All Strata crates log through `tracing`. Binaries and tests that want
//! output call [`init`] once; the `RUST_LOG` environment variable overrides
//! the default filter.

use tracing_subscriber::EnvFilter;

/// Default filter: verbose for Strata, quiet for the wgpu stack.
pub const DEFAULT_FILTER: &str = "debug,wgpu_core=info,wgpu_hal=info,naga=info";

/// Install a global fmt subscriber.
///
/// Panics if a global subscriber was already installed; use [`try_init`] in
/// tests where several cases may race to initialize.
pub fn init() {
    tracing_subscriber::fmt().with_env_filter(filter()).init();
}

/// Install a global fmt subscriber, ignoring an already-installed one.
pub fn try_init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .try_init()
        .is_ok()
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
