//! Resilient Loop: keeps one unit of background work running forever.
//!
//! Each tick waits `loop_delay`, then runs one iteration of the unit inside an
//! [`ExecutionScope`]. A failing (or panicking) iteration is logged and the
//! loop moves on to the next tick. Only cancellation ends the loop.
//!
//! ```text
//! Idle ──start──▶ Delaying ──▶ Invoking ──▶ Delaying ──▶ …
//!                    │                         │
//!                    └──────── cancel ─────────┴──▶ Stopped
//! ```

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{millis, Clock};
use crate::types::UnitKey;
use crate::watchdog::{ExecutionScope, HeartbeatStore, ScopeError};

/// A unit of background work supervised by a [`ResilientLoop`].
///
/// `perform_iteration` is called once per tick. Errors are logged and the
/// next tick runs as normal. Implementations should watch `cancel` and
/// return [`Cancelled`](crate::types::Cancelled) (or just `Ok(())`) promptly
/// once it fires.
#[async_trait]
pub trait ResilientService: Send + Sync + 'static {
    /// Name used in logs and health reports.
    fn name(&self) -> &str;

    /// Run one iteration of work.
    async fn perform_iteration(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Release resources owned by the unit. Called once, after the loop stops.
    async fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Lifecycle state of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Idle,
    Running,
    Delaying,
    Invoking,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Delaying => "delaying",
            LoopState::Invoking => "invoking",
            LoopState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Observable progress of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopStatus {
    pub state: LoopState,
    /// Iterations whose scope has been released (successful or not).
    pub iterations: u64,
    /// Iterations that ended in an error other than a requested stop.
    pub failures: u64,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("loop for '{0}' did not stop before the deadline and was aborted")]
    StopDeadlineExceeded(UnitKey),

    #[error("loop task for '{key}' terminated abnormally: {source}")]
    TaskFailed {
        key: UnitKey,
        #[source]
        source: tokio::task::JoinError,
    },
}

/// An idle loop: everything needed to start supervising one unit.
pub struct ResilientLoop {
    key: UnitKey,
    unit: Arc<dyn ResilientService>,
    loop_delay: Duration,
    store: Arc<HeartbeatStore>,
    clock: Arc<dyn Clock>,
    status: watch::Sender<LoopStatus>,
}

impl fmt::Debug for ResilientLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientLoop")
            .field("key", &self.key)
            .field("unit", &self.unit.name())
            .field("loop_delay", &self.loop_delay)
            .finish_non_exhaustive()
    }
}

impl ResilientLoop {
    pub fn new(
        key: UnitKey,
        unit: Arc<dyn ResilientService>,
        loop_delay: Duration,
        store: Arc<HeartbeatStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status, _) = watch::channel(LoopStatus {
            state: LoopState::Idle,
            iterations: 0,
            failures: 0,
        });
        Self {
            key,
            unit,
            loop_delay,
            store,
            clock,
            status,
        }
    }

    pub fn key(&self) -> &UnitKey {
        &self.key
    }

    /// Watch the loop's status, including before it starts.
    pub fn subscribe(&self) -> watch::Receiver<LoopStatus> {
        self.status.subscribe()
    }

    /// Spawn the tick loop and return immediately.
    ///
    /// The loop runs under a child of `cancel`: cancelling `cancel` stops it,
    /// and [`LoopHandle::stop`] stops only this loop. Must be called from
    /// within a tokio runtime.
    pub fn start(self, cancel: &CancellationToken) -> LoopHandle {
        let token = cancel.child_token();
        let status_rx = self.status.subscribe();
        let key = self.key.clone();
        let unit = self.unit.clone();

        self.status.send_modify(|s| s.state = LoopState::Running);
        info!(
            unit = %key,
            name = unit.name(),
            delay_ms = millis(self.loop_delay),
            "Resilient loop started"
        );

        let task = tokio::spawn(self.run(token.clone()));

        LoopHandle {
            key,
            unit,
            token,
            task: Some(task),
            status: status_rx,
            disposed: false,
        }
    }

    async fn run(self, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }

            self.status.send_modify(|s| s.state = LoopState::Delaying);
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    info!(unit = %self.key, "Cancellation requested during delay");
                    break;
                }
                () = tokio::time::sleep(self.loop_delay) => {}
            }

            self.status.send_modify(|s| s.state = LoopState::Invoking);
            let outcome = self.run_iteration(&token).await;

            let mut stop = false;
            let failed = match outcome {
                Ok(()) => false,
                Err(ScopeError::Failed(e)) if e.is_cancellation() && token.is_cancelled() => {
                    info!(unit = %self.key, "Iteration observed cancellation, stopping loop");
                    stop = true;
                    false
                }
                Err(e) => {
                    error!(unit = %self.key, error = %e, "Iteration failed, continuing");
                    true
                }
            };
            self.status.send_modify(|s| {
                s.iterations += 1;
                if failed {
                    s.failures += 1;
                }
            });

            if stop {
                break;
            }
        }

        self.status.send_modify(|s| s.state = LoopState::Stopped);
        info!(unit = %self.key, "Resilient loop stopped");
    }

    /// One scoped invocation. The scope is released before returning.
    async fn run_iteration(&self, token: &CancellationToken) -> Result<(), ScopeError> {
        let mut scope = ExecutionScope::new(self.store.clone(), self.clock.clone());
        debug!(unit = %self.key, name = self.unit.name(), "Performing iteration");

        let unit = self.unit.clone();
        let child = token.clone();
        let outcome = scope
            .execute(|| async move {
                AssertUnwindSafe(unit.perform_iteration(child))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(anyhow::anyhow!(
                            "iteration panicked: {}",
                            panic_message(payload.as_ref())
                        ))
                    })
            })
            .await;
        scope.release();
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// A running loop.
pub struct LoopHandle {
    key: UnitKey,
    unit: Arc<dyn ResilientService>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<LoopStatus>,
    disposed: bool,
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("key", &self.key)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl LoopHandle {
    pub fn key(&self) -> &UnitKey {
        &self.key
    }

    pub fn status(&self) -> LoopStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopStatus> {
        self.status.clone()
    }

    /// Whether a stop has been requested (or the parent token fired).
    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request a stop and wait for the in-flight iteration to finish.
    ///
    /// If `deadline` fires first the task is aborted and
    /// [`SupervisorError::StopDeadlineExceeded`] is returned.
    pub async fn stop(&mut self, deadline: &CancellationToken) -> Result<(), SupervisorError> {
        self.token.cancel();
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        tokio::select! {
            joined = &mut task => joined.map_err(|source| SupervisorError::TaskFailed {
                key: self.key.clone(),
                source,
            }),
            () = deadline.cancelled() => {
                warn!(unit = %self.key, "Stop deadline reached, aborting loop");
                task.abort();
                Err(SupervisorError::StopDeadlineExceeded(self.key.clone()))
            }
        }
    }

    /// Stop the loop (if still running) and run the unit's disposal hook once.
    pub async fn dispose(&mut self, deadline: &CancellationToken) -> Result<(), SupervisorError> {
        let stopped = self.stop(deadline).await;
        if !self.disposed {
            self.disposed = true;
            if let Err(e) = self.unit.dispose().await {
                warn!(unit = %self.key, error = %e, "Unit disposal failed");
            }
        }
        stopped
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        // Dropping the handle without stop() still ends the loop
        self.token.cancel();
    }
}
