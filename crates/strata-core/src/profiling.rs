//! Profiling utilities based on the `puffin` crate.
//!
//! Scopes are compiled in unconditionally and cost a single atomic load while
//! puffin scopes are off.

pub use puffin::{GlobalProfiler, profile_function, profile_scope};

#[cfg(feature = "profiling-server")]
static PROFILING_SERVER: std::sync::OnceLock<puffin_http::Server> = std::sync::OnceLock::new();

/// Turn puffin scope collection on or off.
pub fn set_enabled(enabled: bool) {
    puffin::set_scopes_on(enabled);
}

/// Enable scopes and serve them to `puffin_viewer` on `addr`.
#[cfg(feature = "profiling-server")]
pub fn init_profiling_server(addr: &str) {
    puffin::set_scopes_on(true);

    match puffin_http::Server::new(addr) {
        Ok(server) => {
            tracing::info!("Puffin profiler server started on http://{addr}");
            let _ = PROFILING_SERVER.set(server);
        }
        Err(e) => {
            tracing::error!("Failed to start puffin server: {}", e);
        }
    }
}

/// Mark the start of a new frame for profiling.
///
/// Call this once per rendered frame so scopes are grouped by frame.
#[inline]
pub fn new_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_toggle() {
        set_enabled(true);
        {
            profile_scope!("toggle");
        }
        new_frame();
        set_enabled(false);
        assert!(!puffin::are_scopes_on());
    }
}
