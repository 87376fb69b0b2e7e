//! Service Configuration Module
//!
//! Per-unit loop delays and health thresholds loaded from TOML, replacing
//! hardcoded values with operator-tunable ones.
//!
//! ## Loading Order
//!
//! 1. `RESURGENT_CONFIG` environment variable (path to TOML file)
//! 2. `resurgent.toml` in the current working directory
//! 3. Built-in defaults (no units configured)
//!
//! ## Hot Reload
//!
//! The active config lives in a [`SharedConfig`] (`ArcSwap`). Readers call
//! `load()` on every use; [`reload`] swaps in a freshly validated copy, and
//! [`watcher::run_config_watcher`] does so whenever the file changes.

pub mod defaults;
pub mod duration;
mod service_config;
pub mod validation;
pub mod watcher;

pub use service_config::*;

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Hot-swappable handle to the active configuration.
pub type SharedConfig = Arc<ArcSwap<ServiceConfig>>;

/// Wrap a config for sharing.
pub fn shared(config: ServiceConfig) -> SharedConfig {
    Arc::new(ArcSwap::from_pointee(config))
}

/// Re-read `path` and swap it into `shared`.
///
/// On any error the previous config stays active. Returns the field-level
/// changes (empty if the file content is equivalent).
pub fn reload(path: &Path, shared: &SharedConfig) -> Result<Vec<ConfigChange>, ConfigError> {
    let new = ServiceConfig::load_from_file(path)?;
    let old = shared.load();
    let changes = old.diff(&new);
    for change in &changes {
        tracing::info!(change = %change, "Config value changed");
    }
    shared.store(Arc::new(new));
    Ok(changes)
}
