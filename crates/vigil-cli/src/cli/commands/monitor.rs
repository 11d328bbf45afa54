//! Monitor command: live dashboard over the feed.

use anyhow::{Context, Result};
use vigil_core::config::{Config, FeedSettings};
use vigil_core::core::watcher::{self, WatcherConfig};

pub fn run(config: &Config, settings: FeedSettings) -> Result<()> {
    // The terminal belongs to the TUI; logs go to a file.
    let _log_guard = crate::logging::init_file()?;

    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    let handle = {
        let _enter = rt.enter();
        watcher::spawn(WatcherConfig::new(settings, config))
    };
    let snapshots = handle.snapshots();

    // The UI owns the foreground thread; the watcher runs on the runtime's
    // worker threads until the user quits.
    let ui_result = vigil_monitor::run(snapshots);

    rt.block_on(handle.shutdown());
    ui_result
}
