//! Health Classifier
//!
//! Pure function from heartbeat state plus thresholds to a [`HealthReport`].
//! Two sub-statuses are computed independently and the overall status is the
//! worse of the two:
//!
//! | Sub-status | Healthy | Degraded | Unhealthy |
//! |---|---|---|---|
//! | Recency (age of last start) | `<= degraded` | `> degraded` | `> unhealthy` or none |
//! | Exceptions in window | `< degraded` | `>= degraded` | `>= unhealthy` |

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::HealthStatus;
use crate::clock::elapsed_between;
use crate::config::duration::format_duration;
use crate::config::HealthCheckConfig;
use crate::types::{CapturedError, Heartbeat};

/// Outcome of one classification.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub description: String,
    /// Labels of the check that produced this report.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub data: HealthData,
}

/// Diagnostic details behind a [`HealthReport`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    pub service: String,
    pub last_heartbeat: Option<Heartbeat>,
    #[serde(serialize_with = "serialize_elapsed")]
    pub time_since_last_heartbeat: Option<Duration>,
    pub exceptions_in_window: usize,
    pub heartbeat_sub_status: HealthStatus,
    pub exception_sub_status: HealthStatus,
    pub configuration: HealthCheckConfig,
}

fn serialize_elapsed<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_str(&format_duration(*d)),
        None => s.serialize_none(),
    }
}

/// Classify one unit's health at `now`.
pub fn classify(
    service: &str,
    last_heartbeat: Option<&Heartbeat>,
    exceptions: &[CapturedError],
    config: &HealthCheckConfig,
    now: DateTime<Utc>,
) -> HealthReport {
    let elapsed = last_heartbeat.map(|hb| elapsed_between(hb.start_time, now));
    let (heartbeat_sub_status, recency_message) = recency_status(elapsed, config);
    let (exception_sub_status, exception_message) = exception_status(exceptions.len(), config);

    HealthReport {
        status: heartbeat_sub_status.worst(exception_sub_status),
        description: format!("{recency_message} {exception_message}"),
        tags: Vec::new(),
        data: HealthData {
            service: service.to_string(),
            last_heartbeat: last_heartbeat.cloned(),
            time_since_last_heartbeat: elapsed,
            exceptions_in_window: exceptions.len(),
            heartbeat_sub_status,
            exception_sub_status,
            configuration: config.clone(),
        },
    }
}

fn recency_status(elapsed: Option<Duration>, config: &HealthCheckConfig) -> (HealthStatus, String) {
    let Some(elapsed) = elapsed else {
        return (HealthStatus::Unhealthy, "No heartbeat received.".to_string());
    };

    let secs = elapsed.as_secs();
    if elapsed > config.unhealthy_time_since_last_heartbeat {
        (
            HealthStatus::Unhealthy,
            format!("Last heartbeat received too long ago ({secs}s ago)."),
        )
    } else if elapsed > config.degraded_time_since_last_heartbeat {
        (
            HealthStatus::Degraded,
            format!("Last heartbeat received too long ago ({secs}s ago)."),
        )
    } else {
        (
            HealthStatus::Healthy,
            format!("Last heartbeat received in good time ({secs}s ago)."),
        )
    }
}

fn exception_status(count: usize, config: &HealthCheckConfig) -> (HealthStatus, String) {
    let window = format_duration(config.exception_counter_sliding_window);
    let n = u32::try_from(count).unwrap_or(u32::MAX);

    if n == 0 {
        (
            HealthStatus::Healthy,
            format!("No exceptions in the last {window}."),
        )
    } else if n < config.degraded_exception_count_threshold {
        (
            HealthStatus::Healthy,
            format!("{n} exception(s) in the last {window}, likely transient."),
        )
    } else if n < config.unhealthy_exception_count_threshold {
        (
            HealthStatus::Degraded,
            format!("{n} exceptions in the last {window}, service degraded."),
        )
    } else {
        (
            HealthStatus::Unhealthy,
            format!("{n} exceptions in the last {window}, service unhealthy."),
        )
    }
}
