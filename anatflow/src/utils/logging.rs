//! Opt-in tracing subscriber setup.
//!
//! Library code only emits `tracing` events; installing a subscriber is
//! the embedding binary's choice. This helper wires up an env-filtered
//! subscriber for binaries and tests that want one.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global subscriber honoring `RUST_LOG`.
///
/// Returns quietly if a subscriber is already installed, so tests may
/// call it repeatedly.
pub fn init_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
