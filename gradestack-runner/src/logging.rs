//! Tracing subscriber setup.
//!
//! Installs a global `fmt` subscriber filtered by `RUST_LOG` (default
//! `info`). Subsequent calls are no-ops.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INSTALLED: OnceLock<()> = OnceLock::new();

pub fn init() {
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // Another subscriber may already be installed by the host process.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init();
    });
}
