//! Execution Scope: one-shot timing wrapper around a single iteration.
//!
//! A scope is created per iteration, runs exactly one action, and registers
//! exactly one heartbeat when it is released. Release happens either through
//! [`ExecutionScope::release`] or on drop, whichever comes first.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::store::HeartbeatStore;
use crate::clock::Clock;
use crate::types::{CapturedError, Heartbeat};

#[derive(Debug, Error)]
pub enum ScopeError {
    /// The scope was asked to run a second action.
    #[error("execution scope has already been run; scopes cannot be reused")]
    AlreadyExecuted,

    /// The action itself failed. The same error is recorded in the heartbeat.
    #[error(transparent)]
    Failed(#[from] CapturedError),
}

/// Wraps one invocation of work and guarantees one heartbeat on release.
#[derive(Debug)]
pub struct ExecutionScope {
    store: Arc<HeartbeatStore>,
    clock: Arc<dyn Clock>,
    start_time: Option<DateTime<Utc>>,
    error: Option<CapturedError>,
    in_flight: bool,
    released: bool,
}

impl ExecutionScope {
    /// Bind a scope to a store. No work is done yet.
    pub fn new(store: Arc<HeartbeatStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            start_time: None,
            error: None,
            in_flight: false,
            released: false,
        }
    }

    /// Run `action` once, capturing its failure.
    ///
    /// The action's error is recorded for the heartbeat and returned unchanged
    /// as [`ScopeError::Failed`]. A second call fails with
    /// [`ScopeError::AlreadyExecuted`] without running anything.
    pub async fn execute<F, Fut>(&mut self, action: F) -> Result<(), ScopeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        if self.start_time.is_some() || self.released {
            return Err(ScopeError::AlreadyExecuted);
        }

        let start = self.clock.now();
        self.start_time = Some(start);
        debug!(unit = %self.store.key(), start_time = %start, "Executing action inside scope");

        self.in_flight = true;
        let outcome = action().await;
        self.in_flight = false;

        outcome.map_err(|e| {
            let captured = CapturedError::new(e);
            self.error = Some(captured.clone());
            ScopeError::Failed(captured)
        })
    }

    /// Whether `execute` has been called.
    pub fn has_executed(&self) -> bool {
        self.start_time.is_some()
    }

    /// Register the heartbeat (if the scope ran). Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let Some(start_time) = self.start_time else {
            warn!(unit = %self.store.key(), "Releasing execution scope that never executed");
            return;
        };

        let end_time = self.clock.now();
        let error = if self.in_flight {
            // The action's future was dropped before it finished
            Some(CapturedError::new(anyhow::anyhow!(
                "iteration abandoned before completion"
            )))
        } else {
            self.error.take()
        };
        debug!(unit = %self.store.key(), end_time = %end_time, failed = error.is_some(), "Releasing execution scope");

        let heartbeat = Heartbeat {
            start_time,
            end_time,
            error,
        };
        let store = &self.store;
        if catch_unwind(AssertUnwindSafe(|| store.register_heartbeat(heartbeat))).is_err() {
            error!(unit = %store.key(), "Failed to register heartbeat; continuing");
        }
    }
}

impl Drop for ExecutionScope {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::UnitKey;
    use std::time::Duration;

    fn fixture() -> (Arc<HeartbeatStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(HeartbeatStore::new(
            UnitKey::from("scoped"),
            Duration::from_secs(300),
            clock.clone(),
        ));
        (store, clock)
    }

    #[tokio::test]
    async fn registers_heartbeat_with_start_and_release_times() {
        let (store, clock) = fixture();
        let initial = clock.now();
        {
            let mut scope = ExecutionScope::new(store.clone(), clock.clone());
            let inner_clock = clock.clone();
            scope
                .execute(|| async move {
                    inner_clock.advance(Duration::from_secs(10));
                    Ok(())
                })
                .await
                .unwrap();
            clock.advance(Duration::from_secs(2));
        }

        let hb = store.last_heartbeat().unwrap();
        assert_eq!(hb.start_time, initial);
        assert_eq!(hb.end_time, initial + chrono::Duration::seconds(12));
        assert!(hb.error.is_none());
    }

    #[tokio::test]
    async fn captures_error_and_returns_it_unchanged() {
        let (store, clock) = fixture();
        let mut scope = ExecutionScope::new(store.clone(), clock);

        let result = scope
            .execute(|| async { Err(anyhow::anyhow!("specific failure")) })
            .await;
        scope.release();

        let returned = match result {
            Err(ScopeError::Failed(e)) => e,
            other => panic!("expected Failed, got {other:?}"),
        };
        assert_eq!(returned.to_string(), "specific failure");

        let recorded = store.last_heartbeat().unwrap().error.unwrap();
        assert!(recorded.ptr_eq(&returned));
    }

    #[tokio::test]
    async fn second_execute_fails_without_running() {
        let (store, clock) = fixture();
        let mut scope = ExecutionScope::new(store, clock);
        scope.execute(|| async { Ok(()) }).await.unwrap();

        let mut ran = false;
        let second = scope
            .execute(|| {
                ran = true;
                async { Ok(()) }
            })
            .await;

        assert!(matches!(second, Err(ScopeError::AlreadyExecuted)));
        assert!(!ran);
        assert!(second.unwrap_err().to_string().contains("already been run"));
    }

    #[test]
    fn unexecuted_scope_registers_nothing() {
        let (store, clock) = fixture();
        drop(ExecutionScope::new(store.clone(), clock));
        assert!(store.last_heartbeat().is_none());
    }

    #[tokio::test]
    async fn double_release_registers_once() {
        let (store, clock) = fixture();
        let mut scope = ExecutionScope::new(store.clone(), clock);
        scope.execute(|| async { Ok(()) }).await.unwrap();

        scope.release();
        scope.release();
        drop(scope);

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn dropped_mid_action_records_abandonment() {
        let (store, clock) = fixture();
        let mut scope = ExecutionScope::new(store.clone(), clock);
        {
            let fut = scope.execute(|| std::future::pending::<anyhow::Result<()>>());
            tokio::pin!(fut);
            let timed_out = tokio::time::timeout(Duration::from_millis(10), &mut fut).await;
            assert!(timed_out.is_err());
        }
        drop(scope);

        let hb = store.last_heartbeat().unwrap();
        let err = hb.error.unwrap();
        assert!(err.to_string().contains("abandoned"));
    }

    #[tokio::test]
    async fn released_scope_cannot_execute() {
        let (store, clock) = fixture();
        let mut scope = ExecutionScope::new(store.clone(), clock);
        scope.release();

        let result = scope.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(ScopeError::AlreadyExecuted)));
        assert!(store.is_empty());
    }
}
