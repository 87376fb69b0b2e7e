//! Health: turns heartbeat history into a tri-state status.
//!
//! [`classify`] is the pure rule set; [`ServiceHealthCheck`] binds it to a
//! unit's store, a clock and hot-swappable thresholds.

pub mod check;
pub mod classifier;
pub mod status;

pub use check::ServiceHealthCheck;
pub use classifier::{classify, HealthData, HealthReport};
pub use status::HealthStatus;
