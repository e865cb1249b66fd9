//! Tracing setup for embedding callers (CLI, MCP server, tests).

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber filtered by `AAM_LOG`, then `RUST_LOG`,
/// then `default_directive` (e.g. `"aam_core=info"`).
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init(default_directive: &str) {
    let filter = std::env::var("AAM_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
