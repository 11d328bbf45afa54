//! Tracing setup.
//!
//! Tail mode logs to stderr (stdout carries the activity lines); monitor mode
//! logs to a rolling file so the subscriber never fights the TUI for the
//! terminal. Filtering comes from `VIGIL_LOG`, defaulting to `info`.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("VIGIL_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Logs to stderr.
pub fn init_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Logs to a daily-rolling file under the vigil logs directory.
///
/// The returned guard flushes the writer on drop; keep it alive for the
/// program's lifetime.
pub fn init_file() -> Result<WorkerGuard> {
    let dir = vigil_core::config::paths::logs_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create logs directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, "vigil.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}
