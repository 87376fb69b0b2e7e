//! Service Configuration: per-unit loop timing and health thresholds.
//!
//! Every unit is a table under `[units.<key>]`. Each struct implements
//! `Default` with the values from [`defaults`](super::defaults), so a unit
//! with an empty table still gets a working loop and health check.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;
use super::duration::{self, format_duration};
use super::validation::ValidationWarning;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration: one entry per supervised unit.
///
/// Load with [`ServiceConfig::load`], which searches:
/// 1. `$RESURGENT_CONFIG`
/// 2. `./resurgent.toml`
/// 3. Built-in defaults (no units)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub units: BTreeMap<String, UnitConfig>,
}

impl ServiceConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        match Self::locate() {
            Some(path) => match Self::load_from_file(&path) {
                Ok(config) => {
                    info!(path = %path.display(), units = config.units.len(), "Loaded service config");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load service config, using defaults");
                    Self::default()
                }
            },
            None => {
                info!("No resurgent.toml found, using built-in defaults");
                Self::default()
            }
        }
    }

    /// Path the standard search order would load, if any exists.
    pub fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                return Some(p);
            }
            warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
        }

        let local = PathBuf::from(defaults::LOCAL_CONFIG_FILE);
        local.exists().then_some(local)
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text.
    ///
    /// Unknown keys are logged as warnings; threshold errors fail the load.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate every unit; warnings are logged, errors collected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        for (key, unit) in &self.units {
            let (unit_errors, warnings) = unit.health.check();
            errors.extend(unit_errors.into_iter().map(|e| format!("units.{key}.health: {e}")));
            for w in warnings {
                warn!(unit = %key, "{}", w);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn unit(&self, key: &str) -> Option<&UnitConfig> {
        self.units.get(key)
    }

    /// Field-level differences between `self` (old) and `new`.
    pub fn diff(&self, new: &Self) -> Vec<ConfigChange> {
        let mut changes = Vec::new();
        for (key, new_unit) in &new.units {
            match self.units.get(key) {
                Some(old_unit) => old_unit.diff_into(key, new_unit, &mut changes),
                None => changes.push(ConfigChange {
                    unit: key.clone(),
                    field: "*".to_string(),
                    old_value: "absent".to_string(),
                    new_value: "added".to_string(),
                }),
            }
        }
        for key in self.units.keys().filter(|k| !new.units.contains_key(*k)) {
            changes.push(ConfigChange {
                unit: key.clone(),
                field: "*".to_string(),
                old_value: "present".to_string(),
                new_value: "removed".to_string(),
            });
        }
        changes
    }
}

/// One changed field between two loaded configs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigChange {
    pub unit: String,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
}

impl std::fmt::Display for ConfigChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "units.{}.{}: {} -> {}",
            self.unit, self.field, self.old_value, self.new_value
        )
    }
}

// ============================================================================
// Unit Config
// ============================================================================

/// Loop timing and health thresholds for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Delay before every iteration.
    #[serde(default = "default_loop_delay", with = "duration")]
    pub loop_delay: Duration,

    /// Heartbeat retention window used until a health check overrides it.
    #[serde(default = "default_exception_window", with = "duration")]
    pub exception_window: Duration,

    /// Display name for the unit's health check (random suffix if unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_name: Option<String>,

    /// Labels attached to the unit's health check.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default)]
    pub health: HealthCheckConfig,
}

fn default_loop_delay() -> Duration {
    defaults::LOOP_DELAY
}

fn default_exception_window() -> Duration {
    defaults::EXCEPTION_WINDOW
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            loop_delay: defaults::LOOP_DELAY,
            exception_window: defaults::EXCEPTION_WINDOW,
            health_check_name: None,
            tags: Vec::new(),
            health: HealthCheckConfig::default(),
        }
    }
}

impl UnitConfig {
    fn diff_into(&self, key: &str, new: &Self, out: &mut Vec<ConfigChange>) {
        let mut push = |field: &str, old: String, new: String| {
            if old != new {
                out.push(ConfigChange {
                    unit: key.to_string(),
                    field: field.to_string(),
                    old_value: old,
                    new_value: new,
                });
            }
        };
        push(
            "loop_delay",
            format_duration(self.loop_delay),
            format_duration(new.loop_delay),
        );
        push(
            "exception_window",
            format_duration(self.exception_window),
            format_duration(new.exception_window),
        );

        push("tags", self.tags.join(","), new.tags.join(","));

        let (o, n) = (&self.health, &new.health);
        push(
            "health.UnhealthyTimeSinceLastHeartbeat",
            format_duration(o.unhealthy_time_since_last_heartbeat),
            format_duration(n.unhealthy_time_since_last_heartbeat),
        );
        push(
            "health.DegradedTimeSinceLastHeartbeat",
            format_duration(o.degraded_time_since_last_heartbeat),
            format_duration(n.degraded_time_since_last_heartbeat),
        );
        push(
            "health.UnhealthyExceptionCountThreshold",
            o.unhealthy_exception_count_threshold.to_string(),
            n.unhealthy_exception_count_threshold.to_string(),
        );
        push(
            "health.DegradedExceptionCountThreshold",
            o.degraded_exception_count_threshold.to_string(),
            n.degraded_exception_count_threshold.to_string(),
        );
        push(
            "health.ExceptionCounterSlidingWindow",
            format_duration(o.exception_counter_sliding_window),
            format_duration(n.exception_counter_sliding_window),
        );
    }
}

// ============================================================================
// Health Check Config
// ============================================================================

/// Thresholds that turn heartbeat age and failure counts into a status.
///
/// Keys use the PascalCase names operators already know from the flat
/// key/value form, e.g. `UnhealthyTimeSinceLastHeartbeat = "30s"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheckConfig {
    /// Unhealthy once the last heartbeat started longer ago than this.
    #[serde(default = "default_unhealthy_time", with = "duration")]
    pub unhealthy_time_since_last_heartbeat: Duration,

    /// Degraded once the last heartbeat started longer ago than this.
    /// Should not exceed `unhealthy_time_since_last_heartbeat`.
    #[serde(default = "default_degraded_time", with = "duration")]
    pub degraded_time_since_last_heartbeat: Duration,

    /// Failures in the window at which the unit is unhealthy.
    #[serde(default = "default_unhealthy_count")]
    pub unhealthy_exception_count_threshold: u32,

    /// Failures in the window at which the unit is degraded.
    /// Should not exceed `unhealthy_exception_count_threshold`.
    #[serde(default = "default_degraded_count")]
    pub degraded_exception_count_threshold: u32,

    /// Window over which failures are counted; also the heartbeat retention window.
    #[serde(default = "default_exception_window", with = "duration")]
    pub exception_counter_sliding_window: Duration,
}

fn default_unhealthy_time() -> Duration {
    defaults::UNHEALTHY_TIME_SINCE_LAST_HEARTBEAT
}

fn default_degraded_time() -> Duration {
    defaults::DEGRADED_TIME_SINCE_LAST_HEARTBEAT
}

fn default_unhealthy_count() -> u32 {
    defaults::UNHEALTHY_EXCEPTION_COUNT_THRESHOLD
}

fn default_degraded_count() -> u32 {
    defaults::DEGRADED_EXCEPTION_COUNT_THRESHOLD
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            unhealthy_time_since_last_heartbeat: defaults::UNHEALTHY_TIME_SINCE_LAST_HEARTBEAT,
            degraded_time_since_last_heartbeat: defaults::DEGRADED_TIME_SINCE_LAST_HEARTBEAT,
            unhealthy_exception_count_threshold: defaults::UNHEALTHY_EXCEPTION_COUNT_THRESHOLD,
            degraded_exception_count_threshold: defaults::DEGRADED_EXCEPTION_COUNT_THRESHOLD,
            exception_counter_sliding_window: defaults::EXCEPTION_WINDOW,
        }
    }
}

impl HealthCheckConfig {
    /// Parse the flat key/value form (`UnhealthyTimeSinceLastHeartbeat` → `"00:00:30"`).
    ///
    /// Missing keys fall back to defaults; unknown keys are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut table = toml::map::Map::new();
        for (k, v) in pairs {
            let value = match v.trim().parse::<i64>() {
                Ok(n) if !k.ends_with("TimeSinceLastHeartbeat") && !k.ends_with("Window") => {
                    toml::Value::Integer(n)
                }
                _ => toml::Value::String(v.to_string()),
            };
            table.insert(k.to_string(), value);
        }
        let config: Self = toml::Value::Table(table)
            .try_into()
            .map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Errors and warnings for this set of thresholds.
    ///
    /// Errors make the config unusable; ordering problems are only warnings
    /// because the classifier still produces a defined result.
    pub fn check(&self) -> (Vec<String>, Vec<ValidationWarning>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.unhealthy_time_since_last_heartbeat.is_zero() {
            errors.push("UnhealthyTimeSinceLastHeartbeat must be > 0".to_string());
        }
        if self.exception_counter_sliding_window.is_zero() {
            errors.push("ExceptionCounterSlidingWindow must be > 0".to_string());
        }
        if self.unhealthy_exception_count_threshold == 0 {
            errors.push("UnhealthyExceptionCountThreshold must be > 0".to_string());
        }

        if self.degraded_time_since_last_heartbeat > self.unhealthy_time_since_last_heartbeat {
            warnings.push(ValidationWarning {
                field: "DegradedTimeSinceLastHeartbeat".to_string(),
                message: format!(
                    "DegradedTimeSinceLastHeartbeat ({}) exceeds UnhealthyTimeSinceLastHeartbeat ({}); units go straight to Unhealthy",
                    format_duration(self.degraded_time_since_last_heartbeat),
                    format_duration(self.unhealthy_time_since_last_heartbeat)
                ),
                suggestion: None,
            });
        }
        if self.degraded_exception_count_threshold > self.unhealthy_exception_count_threshold {
            warnings.push(ValidationWarning {
                field: "DegradedExceptionCountThreshold".to_string(),
                message: format!(
                    "DegradedExceptionCountThreshold ({}) exceeds UnhealthyExceptionCountThreshold ({})",
                    self.degraded_exception_count_threshold,
                    self.unhealthy_exception_count_threshold
                ),
                suggestion: None,
            });
        }

        (errors, warnings)
    }

    /// Fail on errors, log warnings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = self.check();
        for w in &warnings {
            warn!("{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) if path.as_os_str().is_empty() => {
                write!(f, "Config parse error: {}", e)
            }
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Parse(_, e) => Some(e),
            ConfigError::Serialize(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[units.ingest]
loop_delay = "5s"
exception_window = "10m"
health_check_name = "Ingest loop"
tags = ["pipeline", "ready"]

[units.ingest.health]
UnhealthyTimeSinceLastHeartbeat = "00:00:30"
DegradedTimeSinceLastHeartbeat = "00:00:22.5"
UnhealthyExceptionCountThreshold = 5
DegradedExceptionCountThreshold = 2
ExceptionCounterSlidingWindow = "5m"

[units.mailer]
loop_delay = 1
"#;

    #[test]
    fn parses_units_and_health_tables() {
        let config = ServiceConfig::from_toml_str(SAMPLE).unwrap();
        let ingest = config.unit("ingest").unwrap();
        assert_eq!(ingest.loop_delay, Duration::from_secs(5));
        assert_eq!(ingest.exception_window, Duration::from_secs(600));
        assert_eq!(ingest.health_check_name.as_deref(), Some("Ingest loop"));
        assert_eq!(ingest.tags, vec!["pipeline", "ready"]);
        assert_eq!(
            ingest.health.degraded_time_since_last_heartbeat,
            Duration::from_millis(22_500)
        );
        assert_eq!(ingest.health.unhealthy_exception_count_threshold, 5);

        let mailer = config.unit("mailer").unwrap();
        assert_eq!(mailer.loop_delay, Duration::from_secs(1));
        assert_eq!(mailer.health, HealthCheckConfig::default());
        assert!(mailer.tags.is_empty());
    }

    #[test]
    fn empty_file_yields_no_units() {
        let config = ServiceConfig::from_toml_str("").unwrap();
        assert!(config.units.is_empty());
    }

    #[test]
    fn zero_window_is_rejected() {
        let toml = r#"
[units.a.health]
ExceptionCounterSlidingWindow = "0s"
"#;
        let err = ServiceConfig::from_toml_str(toml).unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(errors[0].contains("units.a.health"));
                assert!(errors[0].contains("ExceptionCounterSlidingWindow"));
            }
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn inverted_thresholds_only_warn() {
        let config = HealthCheckConfig {
            degraded_time_since_last_heartbeat: Duration::from_secs(60),
            degraded_exception_count_threshold: 9,
            ..HealthCheckConfig::default()
        };
        let (errors, warnings) = config.check();
        assert!(errors.is_empty());
        assert_eq!(warnings.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn flat_pairs_parse_like_toml() {
        let config = HealthCheckConfig::from_pairs([
            ("UnhealthyTimeSinceLastHeartbeat", "00:00:30"),
            ("DegradedTimeSinceLastHeartbeat", "00:00:22.5"),
            ("UnhealthyExceptionCountThreshold", "5"),
            ("DegradedExceptionCountThreshold", "2"),
            ("ExceptionCounterSlidingWindow", "00:05:00"),
        ])
        .unwrap();

        assert_eq!(config.unhealthy_time_since_last_heartbeat, Duration::from_secs(30));
        assert_eq!(config.degraded_exception_count_threshold, 2);
        assert_eq!(config.exception_counter_sliding_window, Duration::from_secs(300));
    }

    #[test]
    fn flat_pairs_accept_plain_seconds() {
        let config = HealthCheckConfig::from_pairs([
            ("UnhealthyTimeSinceLastHeartbeat", "30"),
            ("DegradedTimeSinceLastHeartbeat", "12.5"),
            ("ExceptionCounterSlidingWindow", "300"),
        ])
        .unwrap();

        assert_eq!(config.unhealthy_time_since_last_heartbeat, Duration::from_secs(30));
        assert_eq!(config.degraded_time_since_last_heartbeat, Duration::from_millis(12_500));
        assert_eq!(config.exception_counter_sliding_window, Duration::from_secs(300));
    }

    #[test]
    fn quoted_seconds_in_toml_are_accepted() {
        let toml = r#"
[units.a.health]
UnhealthyTimeSinceLastHeartbeat = "30"
"#;
        let config = ServiceConfig::from_toml_str(toml).unwrap();
        assert_eq!(
            config.unit("a").unwrap().health.unhealthy_time_since_last_heartbeat,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ServiceConfig::from_toml_str(SAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        assert!(text.contains("UnhealthyTimeSinceLastHeartbeat = \"30s\""));
        assert_eq!(ServiceConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn diff_reports_changed_fields_only() {
        let old = ServiceConfig::from_toml_str(SAMPLE).unwrap();
        let mut new = old.clone();
        if let Some(unit) = new.units.get_mut("ingest") {
            unit.health.degraded_exception_count_threshold = 3;
        }
        new.units.remove("mailer");

        let changes = old.diff(&new);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, "health.DegradedExceptionCountThreshold");
        assert_eq!(changes[0].old_value, "2");
        assert_eq!(changes[0].new_value, "3");
        assert_eq!(changes[1].unit, "mailer");
        assert_eq!(changes[1].new_value, "removed");
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = ServiceConfig::load_from_file(Path::new("/nonexistent/resurgent.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
