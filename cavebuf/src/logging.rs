//! Tracing initialization for binaries and tests embedding cavebuf.
//!
//! The library itself only emits `tracing` events; hosts that want to see
//! them call [`init_tracing`], which writes either to the file named by
//! `CAVEBUF_LOG_FILE` or to stderr.

use std::fs::OpenOptions;

use tracing_subscriber::prelude::*;

/// Environment variable naming an optional log-file target.
const CAVEBUF_LOG_FILE: &str = "CAVEBUF_LOG_FILE";

/// Install a global subscriber filtered by `RUST_LOG`. Repeated calls are
/// no-ops, so tests can call this freely.
pub fn init_tracing() {
    if let Ok(log_file) = std::env::var(CAVEBUF_LOG_FILE) {
        // File logging for hosts whose stderr is not visible, e.g. a module
        // injected into a foreign process.
        init_file_tracing(&log_file);
    } else {
        init_stderr_tracing();
    }
}

fn init_file_tracing(log_file: &str) {
    match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => {
            let _ = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_thread_ids(true)
                        .with_writer(file)
                        .with_target(true)
                        .compact(),
                )
                .with(tracing_subscriber::EnvFilter::from_default_env())
                .try_init();
            tracing::debug!(pid = std::process::id(), "file tracing initialized");
        }
        Err(error) => {
            eprintln!("failed to open log file '{log_file}': {error}, falling back to stderr");
            init_stderr_tracing();
        }
    }
}

fn init_stderr_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
