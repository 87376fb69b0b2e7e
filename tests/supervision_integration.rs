//! Supervision Integration Tests
//!
//! Drive the full path through the public API: registration → resilient loop
//! → execution scope → heartbeat store → health classification. Time runs on
//! a paused tokio clock, so loop delays and heartbeat timestamps move together.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use resurgent::{
    Clock, HealthCheckConfig, HealthStatus, LoopState, RegistrationError, RegistrationOptions,
    ResilientService, ServiceRegistry, UnitKey,
};

const DELAY: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Counter {
    count: AtomicU32,
    failing: AtomicBool,
    disposed: AtomicBool,
}

#[async_trait]
impl ResilientService for Counter {
    fn name(&self) -> &str {
        "Counter"
    }

    async fn perform_iteration(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("downstream unavailable");
        }
        Ok(())
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn options() -> RegistrationOptions {
    RegistrationOptions {
        loop_delay: DELAY,
        exception_window: Duration::from_secs(300),
    }
}

async fn wait_for_iterations(registry: &ServiceRegistry, key: &str, n: u64) {
    let mut rx = registry.subscribe(&UnitKey::new(key)).unwrap();
    rx.wait_for(|s| s.iterations >= n).await.unwrap();
}

// ============================================================================
// Registration contract
// ============================================================================

#[test]
fn duplicate_registration_keeps_first_unit() {
    let registry = ServiceRegistry::with_system_clock();
    let first = Arc::new(Counter::default());

    assert_ok!(registry.register("ingest", first, options()));
    let err = assert_err!(registry.register("ingest", Arc::new(Counter::default()), options()));
    assert!(matches!(err, RegistrationError::DuplicateUnit(_)));

    assert_eq!(registry.keys(), vec![UnitKey::new("ingest")]);
    let check = assert_ok!(registry.add_health_check("ingest", HealthCheckConfig::default(), None, &[]));
    assert_eq!(check.unit_name(), "Counter");
}

#[tokio::test(start_paused = true)]
async fn three_ticks_record_last_heartbeat_at_fifteen_seconds() {
    let registry = ServiceRegistry::with_system_clock();
    let t0 = registry.watchdog().clock().now();
    let unit = Arc::new(Counter::default());
    registry.register("ticker", unit.clone(), options()).unwrap();

    let cancel = CancellationToken::new();
    registry.start(&cancel);
    wait_for_iterations(&registry, "ticker", 3).await;

    assert_eq!(unit.count.load(Ordering::SeqCst), 3);
    let store = registry.watchdog().get(&UnitKey::new("ticker")).unwrap();
    let last = store.last_heartbeat().unwrap();
    assert_eq!(last.start_time, t0 + chrono::Duration::seconds(15));
    assert!(last.error.is_none());

    assert!(registry.stop(&CancellationToken::new()).await.is_empty());
    assert_eq!(unit.count.load(Ordering::SeqCst), 3);
    assert!(unit.disposed.load(Ordering::SeqCst));
}

// ============================================================================
// Loop → heartbeat → classification
// ============================================================================

#[tokio::test(start_paused = true)]
async fn failing_unit_degrades_then_turns_unhealthy() {
    let registry = ServiceRegistry::with_system_clock();
    let unit = Arc::new(Counter::default());
    unit.failing.store(true, Ordering::SeqCst);
    registry.register("ingest", unit.clone(), options()).unwrap();
    let check = registry
        .add_health_check("ingest", HealthCheckConfig::default(), Some("ingest".into()), &[])
        .unwrap();

    // Nothing has run yet
    assert_eq!(check.check().status, HealthStatus::Unhealthy);

    let cancel = CancellationToken::new();
    registry.start(&cancel);

    wait_for_iterations(&registry, "ingest", 3).await;
    let report = check.check();
    assert_eq!(report.data.exceptions_in_window, 3);
    assert_eq!(report.data.heartbeat_sub_status, HealthStatus::Healthy);
    assert_eq!(report.status, HealthStatus::Degraded);

    wait_for_iterations(&registry, "ingest", 5).await;
    assert_eq!(check.check().status, HealthStatus::Unhealthy);

    // Failures never stop supervision
    let status = registry.loop_status(&UnitKey::new("ingest")).unwrap();
    assert_eq!(status.failures, 5);
    assert_ne!(status.state, LoopState::Stopped);

    cancel.cancel();
    registry.stop(&CancellationToken::new()).await;
}

#[tokio::test(start_paused = true)]
async fn recovered_unit_heals_once_failures_leave_window() {
    let registry = ServiceRegistry::with_system_clock();
    let unit = Arc::new(Counter::default());
    unit.failing.store(true, Ordering::SeqCst);
    registry.register("ingest", unit.clone(), options()).unwrap();

    let config = HealthCheckConfig {
        exception_counter_sliding_window: Duration::from_secs(30),
        ..HealthCheckConfig::default()
    };
    let check = registry.add_health_check("ingest", config, None, &[]).unwrap();

    registry.start(&CancellationToken::new());
    wait_for_iterations(&registry, "ingest", 2).await;
    assert_eq!(check.check().status, HealthStatus::Degraded);

    unit.failing.store(false, Ordering::SeqCst);
    // Six more clean ticks push both failures out of the 30s window
    wait_for_iterations(&registry, "ingest", 8).await;
    let report = check.check();
    assert_eq!(report.data.exceptions_in_window, 0);
    assert_eq!(report.status, HealthStatus::Healthy);

    registry.stop(&CancellationToken::new()).await;
}

#[tokio::test(start_paused = true)]
async fn stopped_unit_goes_stale() {
    let registry = ServiceRegistry::with_system_clock();
    registry
        .register("ingest", Arc::new(Counter::default()), options())
        .unwrap();
    let check = registry
        .add_health_check("ingest", HealthCheckConfig::default(), None, &[])
        .unwrap();

    registry.start(&CancellationToken::new());
    wait_for_iterations(&registry, "ingest", 1).await;
    assert_eq!(check.check().status, HealthStatus::Healthy);
    registry.stop(&CancellationToken::new()).await;

    tokio::time::advance(Duration::from_secs(20)).await;
    assert_eq!(check.check().status, HealthStatus::Degraded);

    tokio::time::advance(Duration::from_secs(11)).await;
    let report = check.check();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(report.description.contains("too long ago (31s ago)"));
}

#[tokio::test(start_paused = true)]
async fn units_are_isolated() {
    let registry = ServiceRegistry::with_system_clock();
    let good = Arc::new(Counter::default());
    let bad = Arc::new(Counter::default());
    bad.failing.store(true, Ordering::SeqCst);

    registry.register("good", good, options()).unwrap();
    registry.register("bad", bad, options()).unwrap();
    registry
        .add_health_check("good", HealthCheckConfig::default(), Some("good".into()), &[])
        .unwrap();
    registry
        .add_health_check("bad", HealthCheckConfig::default(), Some("bad".into()), &[])
        .unwrap();

    registry.start(&CancellationToken::new());
    wait_for_iterations(&registry, "bad", 5).await;
    wait_for_iterations(&registry, "good", 5).await;

    let report = registry.check_all();
    assert_eq!(report.checks["good"].status, HealthStatus::Healthy);
    assert_eq!(report.checks["bad"].status, HealthStatus::Unhealthy);
    assert_eq!(report.status, HealthStatus::Unhealthy);

    registry.stop(&CancellationToken::new()).await;
}
