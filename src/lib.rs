//! Resurgent: resilient background loops with watchdog health checks
//!
//! Supervises long-running units of background work so that no single failing
//! iteration can stop them, and reports how recently and how reliably each unit
//! has run as a tri-state health status.
//!
//! ## Architecture
//!
//! - **Resilient Loop**: one tokio task per unit, fixed delay, retries forever
//! - **Execution Scope**: times one iteration and records its outcome
//! - **Heartbeat Store**: per-unit sliding window of outcomes
//! - **Health Classifier**: heartbeat age + failure count → Healthy/Degraded/Unhealthy
//!
//! ```text
//! ResilientLoop tick ─▶ ExecutionScope ─▶ HeartbeatStore ◀─ ServiceHealthCheck::check()
//! ```

pub mod api;
pub mod background;
pub mod clock;
pub mod config;
pub mod health;
pub mod registry;
pub mod types;
pub mod watchdog;

// Re-export configuration
pub use config::{HealthCheckConfig, ServiceConfig, UnitConfig};

// Re-export core types
pub use clock::{Clock, ManualClock, SystemClock};
pub use types::{Cancelled, CapturedError, Heartbeat, UnitKey};

// Re-export supervision
pub use background::{LoopHandle, LoopState, LoopStatus, ResilientLoop, ResilientService};
pub use watchdog::{ExecutionScope, HeartbeatStore, ScopeError, WatchdogRegistry};

// Re-export health
pub use health::{classify, HealthReport, HealthStatus, ServiceHealthCheck};
pub use registry::{RegistrationError, RegistrationOptions, RegistryReport, ServiceRegistry};
