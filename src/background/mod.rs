//! Background services: resilient loops that supervise units of work
//!
//! Each registered unit runs as its own tokio task that retries forever after
//! a fixed delay and records a heartbeat per iteration.

pub mod resilient_loop;

pub use resilient_loop::{
    LoopHandle, LoopState, LoopStatus, ResilientLoop, ResilientService, SupervisorError,
};
