//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

use std::time::Duration;

// ============================================================================
// Supervisor
// ============================================================================

/// Delay between iterations when a unit does not configure one.
pub const LOOP_DELAY: Duration = Duration::from_secs(5);

/// Sliding window for heartbeat retention when a unit does not configure one.
pub const EXCEPTION_WINDOW: Duration = Duration::from_secs(5 * 60);

/// How long shutdown waits for in-flight iterations before aborting them.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

// ============================================================================
// Health thresholds
// ============================================================================

/// Unhealthy once the last heartbeat started more than this long ago.
pub const UNHEALTHY_TIME_SINCE_LAST_HEARTBEAT: Duration = Duration::from_secs(30);

/// Degraded once the last heartbeat started more than this long ago.
pub const DEGRADED_TIME_SINCE_LAST_HEARTBEAT: Duration = Duration::from_secs(15);

/// Failures in the window at which the unit is unhealthy.
pub const UNHEALTHY_EXCEPTION_COUNT_THRESHOLD: u32 = 5;

/// Failures in the window at which the unit is degraded.
pub const DEGRADED_EXCEPTION_COUNT_THRESHOLD: u32 = 2;

// ============================================================================
// Config file
// ============================================================================

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "RESURGENT_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "resurgent.toml";

/// Interval between config file mtime checks.
pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Debounce delay after detecting a change (editors often write in stages).
pub const CONFIG_DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

// ============================================================================
// Demo host
// ============================================================================

/// Default bind address for the `/health` endpoint.
pub const HEALTH_ADDR: &str = "127.0.0.1:8080";

/// Default interval between logged health probes (seconds).
pub const PROBE_INTERVAL_SECS: u64 = 10;
