//! Structured logging init (C7): a file sink that always receives `info`+
//! regardless of verbosity, plus an stdout sink gated by `--verbose`.
//!
//! Grounded on the teacher's `main.rs` `tracing_subscriber::fmt()...init()`
//! call, extended to layer a file appender since spec.md §6 requires a
//! "process-wide log file at a fixed path ... should be configurable."

use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber. Best-effort: if the log file
/// can't be opened, logging falls back to stdout only (§7 — "log writes are
/// best-effort; failure to log never aborts a session").
pub fn init(log_file: &str, verbose: bool) {
    let stdout_level = if verbose { "debug" } else { "info" };
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("deezle_fleet_server={stdout_level}")));

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stdout)
        .with_filter(stdout_filter);

    match open_log_file(log_file) {
        Some(file) => {
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .with_filter(tracing::level_filters::LevelFilter::INFO);
            tracing_subscriber::registry().with(stdout_layer).with(file_layer).init();
        }
        None => {
            tracing_subscriber::registry().with(stdout_layer).init();
            tracing::warn!(path = log_file, "could not open log file, logging to stdout only");
        }
    }
}

fn open_log_file(path: &str) -> Option<std::fs::File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path).ok()
}
