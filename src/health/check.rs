//! Health check bound to one unit's heartbeat store.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::Rng;
use tracing::{debug, info};

use super::{classify, HealthReport};
use crate::clock::Clock;
use crate::config::HealthCheckConfig;
use crate::types::UnitKey;
use crate::watchdog::HeartbeatStore;

/// Queryable health of one supervised unit.
///
/// Thresholds live behind an [`ArcSwap`], so a reloaded config is picked up
/// by the next [`check`](Self::check) without restarting anything.
pub struct ServiceHealthCheck {
    unit_name: String,
    display_name: String,
    tags: Vec<String>,
    store: Arc<HeartbeatStore>,
    clock: Arc<dyn Clock>,
    config: ArcSwap<HealthCheckConfig>,
}

impl fmt::Debug for ServiceHealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHealthCheck")
            .field("name", &self.display_name)
            .field("unit", self.store.key())
            .field("tags", &self.tags)
            .field("config", &*self.config.load())
            .finish_non_exhaustive()
    }
}

impl ServiceHealthCheck {
    /// Bind a check to `store`. The store's window follows the config's
    /// `ExceptionCounterSlidingWindow`.
    pub fn new(
        unit_name: impl Into<String>,
        custom_name: Option<String>,
        tags: Vec<String>,
        store: Arc<HeartbeatStore>,
        clock: Arc<dyn Clock>,
        config: HealthCheckConfig,
    ) -> Self {
        let unit_name = unit_name.into();
        let display_name = custom_name.unwrap_or_else(|| default_check_name(&unit_name));
        store.set_window(config.exception_counter_sliding_window);

        Self {
            unit_name,
            display_name,
            tags,
            store,
            clock,
            config: ArcSwap::from_pointee(config),
        }
    }

    /// Display name, unique within a registry.
    pub fn name(&self) -> &str {
        &self.display_name
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// Labels used to select subsets of checks, e.g. `GET /health?tag=ready`.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn key(&self) -> &UnitKey {
        self.store.key()
    }

    /// Snapshot of the thresholds in force.
    pub fn config(&self) -> Arc<HealthCheckConfig> {
        self.config.load_full()
    }

    /// Swap in new thresholds and resize the store window.
    ///
    /// Returns `false` (and changes nothing) if `config` equals the current one.
    pub fn apply_config(&self, config: HealthCheckConfig) -> bool {
        if *self.config.load_full() == config {
            return false;
        }
        self.store.set_window(config.exception_counter_sliding_window);
        self.config.store(Arc::new(config));
        info!(check = %self.display_name, unit = %self.store.key(), "Health check thresholds updated");
        true
    }

    /// Classify the unit's current state.
    pub fn check(&self) -> HealthReport {
        let config = self.config.load();
        let now = self.clock.now();
        let last = self.store.last_heartbeat();
        let exceptions = self.store.exceptions_in_window();

        let mut report = classify(&self.unit_name, last.as_ref(), &exceptions, &config, now);
        report.tags.clone_from(&self.tags);
        debug!(
            check = %self.display_name,
            status = %report.status,
            exceptions = report.data.exceptions_in_window,
            "Health check evaluated"
        );
        report
    }
}

/// `"{unit} (1a2b3c4d)"`, random per call.
pub(crate) fn default_check_name(unit_name: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{unit_name} ({suffix:08x})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::health::HealthStatus;
    use crate::types::Heartbeat;
    use std::time::Duration;

    fn fixture(config: HealthCheckConfig) -> (Arc<ManualClock>, Arc<HeartbeatStore>, ServiceHealthCheck) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(HeartbeatStore::new(
            UnitKey::new("ingest"),
            Duration::from_secs(60),
            clock.clone(),
        ));
        let check = ServiceHealthCheck::new(
            "Ingest",
            None,
            vec!["pipeline".to_string()],
            store.clone(),
            clock.clone(),
            config,
        );
        (clock, store, check)
    }

    #[test]
    fn default_name_has_hex_suffix() {
        let (_, _, check) = fixture(HealthCheckConfig::default());
        let name = check.name();
        assert!(name.starts_with("Ingest ("));
        assert!(name.ends_with(')'));
        let hex = &name["Ingest (".len()..name.len() - 1];
        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn custom_name_overrides_default() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(HeartbeatStore::new(UnitKey::new("a"), Duration::from_secs(60), clock.clone()));
        let check = ServiceHealthCheck::new(
            "A",
            Some("primary ingest".to_string()),
            Vec::new(),
            store,
            clock,
            HealthCheckConfig::default(),
        );
        assert_eq!(check.name(), "primary ingest");
    }

    #[test]
    fn reports_carry_check_tags() {
        let (_, _, check) = fixture(HealthCheckConfig::default());
        assert!(check.has_tag("pipeline"));
        assert!(!check.has_tag("mailer"));
        assert_eq!(check.check().tags, vec!["pipeline".to_string()]);
    }

    #[test]
    fn config_window_drives_store_window() {
        let config = HealthCheckConfig {
            exception_counter_sliding_window: Duration::from_secs(120),
            ..HealthCheckConfig::default()
        };
        let (_, store, check) = fixture(config);
        assert_eq!(store.window(), Duration::from_secs(120));

        check.apply_config(HealthCheckConfig {
            exception_counter_sliding_window: Duration::from_secs(30),
            ..HealthCheckConfig::default()
        });
        assert_eq!(store.window(), Duration::from_secs(30));
    }

    #[test]
    fn check_reads_current_config_each_time() {
        let (clock, store, check) = fixture(HealthCheckConfig::default());
        let now = clock.now();
        for _ in 0..3 {
            store.register_heartbeat(Heartbeat::failure(now, now, anyhow::anyhow!("boom")));
        }
        assert_eq!(check.check().status, HealthStatus::Degraded);

        let changed = check.apply_config(HealthCheckConfig {
            unhealthy_exception_count_threshold: 3,
            ..HealthCheckConfig::default()
        });
        assert!(changed);
        assert_eq!(check.check().status, HealthStatus::Unhealthy);

        assert!(!check.apply_config(check.config().as_ref().clone()));
    }

    #[test]
    fn recency_follows_clock() {
        let (clock, store, check) = fixture(HealthCheckConfig::default());
        assert_eq!(check.check().status, HealthStatus::Unhealthy);

        let now = clock.now();
        store.register_heartbeat(Heartbeat::success(now, now));
        assert_eq!(check.check().status, HealthStatus::Healthy);

        clock.advance(Duration::from_secs(20));
        assert_eq!(check.check().status, HealthStatus::Degraded);

        clock.advance(Duration::from_secs(20));
        let report = check.check();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.data.service, "Ingest");
    }
}
