//! Polling-based config file watcher.
//!
//! Checks the config file's mtime every poll interval. When a change is
//! detected, debounces (to handle partial writes from editors), then reloads
//! the file into the shared config and sends the result via an mpsc channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::defaults::{CONFIG_DEBOUNCE_DELAY, CONFIG_POLL_INTERVAL};
use super::{ConfigChange, ServiceConfig, SharedConfig};

/// Events emitted by the config watcher.
#[derive(Debug)]
pub enum ConfigEvent {
    /// Config was successfully reloaded with these changes.
    Reloaded {
        config: Arc<ServiceConfig>,
        changes: Vec<ConfigChange>,
    },
    /// Reload was attempted but failed (old config remains active).
    Error(String),
}

/// Poll and debounce intervals.
#[derive(Debug, Clone, Copy)]
pub struct WatchTiming {
    pub poll: Duration,
    pub debounce: Duration,
}

impl Default for WatchTiming {
    fn default() -> Self {
        Self {
            poll: CONFIG_POLL_INTERVAL,
            debounce: CONFIG_DEBOUNCE_DELAY,
        }
    }
}

/// Run the config file watcher loop.
///
/// Polls `path` for mtime changes and reloads `shared` when detected.
/// Sends events on `tx`. Returns when the channel is closed or `cancel` fires.
pub async fn run_config_watcher(
    path: PathBuf,
    shared: SharedConfig,
    tx: mpsc::Sender<ConfigEvent>,
    timing: WatchTiming,
    cancel: CancellationToken,
) {
    tracing::info!(path = %path.display(), "Config watcher started");

    let mut last_mtime = get_mtime(&path);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Config watcher cancelled");
                return;
            }
            () = tokio::time::sleep(timing.poll) => {}
        }

        // If we can't read mtime (file deleted, permissions), warn and keep polling
        let Some(current) = get_mtime(&path) else {
            // Only warn if we previously had a valid mtime (file was deleted)
            if last_mtime.is_some() {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not accessible, keeping current config and retrying"
                );
                last_mtime = None;
            }
            continue;
        };

        // A missing previous mtime means the file reappeared
        if last_mtime == Some(current) {
            continue;
        }

        // Debounce: wait, then re-check mtime to ensure write is complete
        tokio::time::sleep(timing.debounce).await;
        if get_mtime(&path) != Some(current) {
            continue;
        }
        last_mtime = Some(current);

        let event = match super::reload(&path, &shared) {
            Ok(changes) => ConfigEvent::Reloaded {
                config: shared.load_full(),
                changes,
            },
            Err(e) => {
                tracing::error!(error = %e, "Config hot-reload failed, keeping previous config");
                ConfigEvent::Error(e.to_string())
            }
        };

        if tx.send(event).await.is_err() {
            tracing::debug!("Config watcher channel closed, stopping");
            return;
        }
    }
}

/// Read the modification time of a file, returning None on any error.
fn get_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
