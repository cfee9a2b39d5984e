//! Framework-level tracing setup for host programs and tests.
//!
//! The runtime's own diagnostics (wiring, worker lifecycles, persistence)
//! go through `tracing`; pipeline events from stages flow through the
//! rate-limited [`crate::logger`] instead. `init` is safe to call more
//! than once: later calls are no-ops, so every integration test can
//! install it blindly without coordinating a single entry point.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Install a compact stderr subscriber scoped to this crate's diagnostics.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies to the
/// runtime's own target only, so a host's other crates stay quiet unless
/// the host asks for them.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("brink={default_level}")));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
