//! Logging and observability
//!
//! Structured `tracing` spans cover every externally-visible operation
//! (config load, fetch, resolve, recipe generation, image prep, hook exec,
//! launch state transitions). Filter directives come from `PACKNPLAY_LOG`
//! if set, falling back to the conventional `RUST_LOG`, and finally to
//! `info`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system, honoring `PACKNPLAY_LOG` in preference
/// to `RUST_LOG`.
pub fn init() -> anyhow::Result<()> {
    let filter = std::env::var("PACKNPLAY_LOG")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    tracing::debug!("logging initialized");
    Ok(())
}
