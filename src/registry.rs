//! Service Registry: the registration contract.
//!
//! Registering a unit creates its heartbeat store and an idle
//! [`ResilientLoop`]; adding a health check binds a [`ServiceHealthCheck`] to
//! the same store. [`ServiceRegistry::start`] spawns every idle loop and
//! [`ServiceRegistry::stop`] winds them all down.
//!
//! ```text
//! register(key, unit) ──▶ HeartbeatStore[key] ◀── ServiceHealthCheck (add_health_check)
//!        │                      ▲
//!        ▼                      │ heartbeats
//!  ResilientLoop ──start──▶ LoopHandle
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::background::{LoopHandle, LoopStatus, ResilientLoop, ResilientService, SupervisorError};
use crate::clock::{millis, Clock, SystemClock};
use crate::config::{defaults, ConfigError, HealthCheckConfig, ServiceConfig, UnitConfig};
use crate::health::check::default_check_name;
use crate::health::{HealthReport, HealthStatus, ServiceHealthCheck};
use crate::types::UnitKey;
use crate::watchdog::WatchdogRegistry;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("unit '{0}' is already registered")]
    DuplicateUnit(UnitKey),

    #[error("unit '{0}' is not registered")]
    UnknownUnit(UnitKey),

    #[error("a health check named '{0}' is already registered")]
    DuplicateHealthCheck(String),

    #[error("invalid health check config for '{key}': {source}")]
    InvalidConfig {
        key: UnitKey,
        #[source]
        source: ConfigError,
    },
}

/// Loop timing for one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationOptions {
    pub loop_delay: Duration,
    /// Initial heartbeat window; a health check replaces it with its
    /// `ExceptionCounterSlidingWindow`.
    pub exception_window: Duration,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            loop_delay: defaults::LOOP_DELAY,
            exception_window: defaults::EXCEPTION_WINDOW,
        }
    }
}

impl From<&UnitConfig> for RegistrationOptions {
    fn from(unit: &UnitConfig) -> Self {
        Self {
            loop_delay: unit.loop_delay,
            exception_window: unit.exception_window,
        }
    }
}

/// Aggregate health of every registered check.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryReport {
    /// Worst status across all checks (`Healthy` when there are none).
    pub status: HealthStatus,
    /// Reports keyed by check display name.
    pub checks: BTreeMap<String, HealthReport>,
    /// Loop progress keyed by unit.
    pub loops: BTreeMap<String, LoopStatus>,
}

enum LoopSlot {
    Idle(ResilientLoop),
    Running(LoopHandle),
    Stopped(LoopStatus),
}

struct Registration {
    unit: Arc<dyn ResilientService>,
    slot: LoopSlot,
}

impl Registration {
    fn status(&self) -> LoopStatus {
        match &self.slot {
            LoopSlot::Idle(l) => *l.subscribe().borrow(),
            LoopSlot::Running(h) => h.status(),
            LoopSlot::Stopped(s) => *s,
        }
    }
}

/// Owns every supervised unit and its health check.
pub struct ServiceRegistry {
    watchdog: WatchdogRegistry,
    units: Mutex<BTreeMap<UnitKey, Registration>>,
    checks: RwLock<BTreeMap<UnitKey, Arc<ServiceHealthCheck>>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("units", &self.units.lock().keys().collect::<Vec<_>>())
            .field("checks", &self.checks.read().len())
            .finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            watchdog: WatchdogRegistry::new(clock),
            units: Mutex::new(BTreeMap::new()),
            checks: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }

    pub fn watchdog(&self) -> &WatchdogRegistry {
        &self.watchdog
    }

    /// Register a unit under `key` with an idle loop.
    ///
    /// A duplicate key is rejected and the existing registration is untouched.
    pub fn register(
        &self,
        key: impl Into<UnitKey>,
        unit: Arc<dyn ResilientService>,
        options: RegistrationOptions,
    ) -> Result<(), RegistrationError> {
        let key = key.into();
        let mut units = self.units.lock();
        if units.contains_key(&key) {
            warn!(unit = %key, "Rejected duplicate unit registration");
            return Err(RegistrationError::DuplicateUnit(key));
        }

        let store = self.watchdog.store_for(&key, options.exception_window);
        let resilient = ResilientLoop::new(
            key.clone(),
            unit.clone(),
            options.loop_delay,
            store,
            self.watchdog.clock(),
        );
        info!(
            unit = %key,
            name = unit.name(),
            delay_ms = millis(options.loop_delay),
            "Unit registered"
        );
        units.insert(
            key,
            Registration {
                unit,
                slot: LoopSlot::Idle(resilient),
            },
        );
        Ok(())
    }

    /// Bind a health check to a registered unit's store.
    ///
    /// Each unit gets at most one check, and display names are unique.
    /// `tags` label the check for [`check_tagged`](Self::check_tagged).
    pub fn add_health_check(
        &self,
        key: impl Into<UnitKey>,
        config: HealthCheckConfig,
        custom_name: Option<String>,
        tags: &[String],
    ) -> Result<Arc<ServiceHealthCheck>, RegistrationError> {
        let key = key.into();
        config
            .validate()
            .map_err(|source| RegistrationError::InvalidConfig {
                key: key.clone(),
                source,
            })?;

        let unit_name = match self.units.lock().get(&key) {
            Some(reg) => reg.unit.name().to_string(),
            None => return Err(RegistrationError::UnknownUnit(key)),
        };
        let store = self
            .watchdog
            .get(&key)
            .ok_or_else(|| RegistrationError::UnknownUnit(key.clone()))?;

        let mut checks = self.checks.write();
        if let Some(existing) = checks.get(&key) {
            return Err(RegistrationError::DuplicateHealthCheck(existing.name().to_string()));
        }
        let name = custom_name.unwrap_or_else(|| default_check_name(&unit_name));
        if checks.values().any(|c| c.name() == name) {
            return Err(RegistrationError::DuplicateHealthCheck(name));
        }

        let check = Arc::new(ServiceHealthCheck::new(
            unit_name,
            Some(name),
            tags.to_vec(),
            store,
            self.watchdog.clock(),
            config,
        ));
        info!(unit = %key, check = check.name(), tags = ?check.tags(), "Health check registered");
        checks.insert(key, check.clone());
        Ok(check)
    }

    /// Register a unit and its health check from a loaded config.
    ///
    /// Units missing from `config` get default timing and thresholds.
    pub fn register_configured(
        &self,
        key: impl Into<UnitKey>,
        unit: Arc<dyn ResilientService>,
        config: &ServiceConfig,
    ) -> Result<Arc<ServiceHealthCheck>, RegistrationError> {
        let key = key.into();
        let unit_config = config.unit(key.as_str()).cloned().unwrap_or_default();
        self.register(key.clone(), unit, RegistrationOptions::from(&unit_config))?;
        self.add_health_check(
            key,
            unit_config.health,
            unit_config.health_check_name,
            &unit_config.tags,
        )
    }

    /// Spawn every idle loop. Returns how many were started.
    ///
    /// Non-blocking; must be called from within a tokio runtime.
    pub fn start(&self, cancel: &CancellationToken) -> usize {
        let mut started = 0;
        for reg in self.units.lock().values_mut() {
            let status = reg.status();
            let slot = std::mem::replace(&mut reg.slot, LoopSlot::Stopped(status));
            reg.slot = match slot {
                LoopSlot::Idle(resilient) => {
                    started += 1;
                    LoopSlot::Running(resilient.start(cancel))
                }
                other => other,
            };
        }
        info!(started, "Supervised loops started");
        started
    }

    /// Stop every loop and run each unit's disposal hook.
    ///
    /// In-flight iterations finish unless `deadline` fires first, in which
    /// case they are aborted. Returns the loops that did not stop cleanly.
    pub async fn stop(&self, deadline: &CancellationToken) -> Vec<SupervisorError> {
        let drained: Vec<(UnitKey, Arc<dyn ResilientService>, LoopSlot)> = {
            let mut units = self.units.lock();
            units
                .iter_mut()
                .map(|(key, reg)| {
                    let status = reg.status();
                    let slot = std::mem::replace(&mut reg.slot, LoopSlot::Stopped(status));
                    (key.clone(), reg.unit.clone(), slot)
                })
                .collect()
        };

        let stops = drained.into_iter().map(|(key, unit, slot)| async move {
            match slot {
                LoopSlot::Running(mut handle) => {
                    let result = handle.dispose(deadline).await;
                    (key, Some(handle.status()), result)
                }
                LoopSlot::Idle(_) => {
                    if let Err(e) = unit.dispose().await {
                        warn!(unit = %key, error = %e, "Unit disposal failed");
                    }
                    (key, None, Ok(()))
                }
                LoopSlot::Stopped(_) => (key, None, Ok(())),
            }
        });
        let results = futures::future::join_all(stops).await;

        let mut failures = Vec::new();
        let mut units = self.units.lock();
        for (key, status, result) in results {
            if let (Some(status), Some(reg)) = (status, units.get_mut(&key)) {
                reg.slot = LoopSlot::Stopped(status);
            }
            if let Err(e) = result {
                warn!(unit = %key, error = %e, "Loop did not stop cleanly");
                failures.push(e);
            }
        }
        info!(failures = failures.len(), "Supervised loops stopped");
        failures
    }

    pub fn health_check(&self, key: &UnitKey) -> Option<Arc<ServiceHealthCheck>> {
        self.checks.read().get(key).cloned()
    }

    pub fn loop_status(&self, key: &UnitKey) -> Option<LoopStatus> {
        self.units.lock().get(key).map(Registration::status)
    }

    /// Watch a unit's loop status. Valid before and after `start`.
    pub fn subscribe(&self, key: &UnitKey) -> Option<watch::Receiver<LoopStatus>> {
        self.units.lock().get(key).and_then(|reg| match &reg.slot {
            LoopSlot::Idle(l) => Some(l.subscribe()),
            LoopSlot::Running(h) => Some(h.subscribe()),
            LoopSlot::Stopped(_) => None,
        })
    }

    pub fn keys(&self) -> Vec<UnitKey> {
        self.units.lock().keys().cloned().collect()
    }

    /// Run every health check.
    pub fn check_all(&self) -> RegistryReport {
        self.check_tagged(None)
    }

    /// Run the checks carrying `tag`, or all of them when `tag` is `None`.
    ///
    /// With a tag, only the loops of the selected units are reported and the
    /// overall status covers the selected checks alone.
    pub fn check_tagged(&self, tag: Option<&str>) -> RegistryReport {
        let checks: Vec<(UnitKey, Arc<ServiceHealthCheck>)> = self
            .checks
            .read()
            .iter()
            .filter(|(_, c)| tag.map_or(true, |t| c.has_tag(t)))
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        let reports: BTreeMap<String, HealthReport> = checks
            .iter()
            .map(|(_, c)| (c.name().to_string(), c.check()))
            .collect();
        let loops = self
            .units
            .lock()
            .iter()
            .filter(|(k, _)| tag.is_none() || checks.iter().any(|(ck, _)| ck == *k))
            .map(|(k, reg)| (k.to_string(), reg.status()))
            .collect();

        RegistryReport {
            status: HealthStatus::worst_of(reports.values().map(|r| r.status)),
            checks: reports,
            loops,
        }
    }

    /// Push reloaded thresholds to the matching checks.
    ///
    /// Returns the units whose thresholds changed. Loop delays are fixed at
    /// registration and are not affected.
    pub fn apply_config(&self, config: &ServiceConfig) -> Vec<UnitKey> {
        let mut changed = Vec::new();
        for (key, check) in self.checks.read().iter() {
            let Some(unit) = config.unit(key.as_str()) else {
                continue;
            };
            if let Err(e) = unit.health.validate() {
                warn!(unit = %key, error = %e, "Ignoring invalid reloaded health config");
                continue;
            }
            if check.apply_config(unit.health.clone()) {
                changed.push(key.clone());
            }
        }
        changed
    }
}
