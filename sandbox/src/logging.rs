//! Development-time tracing for the sandbox.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr
//!   and, for the scheduler, appended to `<root>/autorun.log`.
//!
//! - **Run logs (`io/run_log`)**: product records in `<root>/logs/`. Always
//!   written, unaffected by `RUST_LOG`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Initialize tracing to stderr.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=sandbox=debug sandbox run script.py
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

/// Like [`init`], additionally appending plain-text events to `path`.
///
/// If the file cannot be opened, only stderr output is installed and the
/// failure is reported as a warning.
pub fn init_with_file(path: &Path) {
    let (file_layer, open_error) = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => (
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            ),
            None,
        ),
        Err(err) => (None, Some(err)),
    };
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .init();
    if let Some(err) = open_error {
        tracing::warn!(path = %path.display(), err = %err, "autorun log unavailable");
    }
}
