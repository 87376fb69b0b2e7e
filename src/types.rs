//! Core value types shared by the watchdog, supervisor and health modules.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

// ============================================================================
// Monitored-unit key
// ============================================================================

/// Opaque identifier of one supervised unit.
///
/// All heartbeat history and health configuration is partitioned by this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitKey(Arc<str>);

impl UnitKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for UnitKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl Serialize for UnitKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

// ============================================================================
// Errors carried by heartbeats
// ============================================================================

/// Returned by a work unit that stopped because its cancellation token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// A failure captured from one supervised iteration.
///
/// Shared so the same error can sit in a heartbeat and be handed back to the
/// caller of the execution scope.
#[derive(Debug, Clone)]
pub struct CapturedError(Arc<anyhow::Error>);

impl CapturedError {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    /// The underlying error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// True when the error (or anything in its chain) is [`Cancelled`].
    pub fn is_cancellation(&self) -> bool {
        self.0.chain().any(|e| e.is::<Cancelled>())
    }

    /// Whether two handles point at the same captured failure.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for CapturedError {}

impl From<anyhow::Error> for CapturedError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

impl Serialize for CapturedError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// Heartbeat
// ============================================================================

/// Record of one completed (or failed) supervised execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Failure raised by the iteration, if any.
    pub error: Option<CapturedError>,
}

impl Heartbeat {
    pub fn success(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
            error: None,
        }
    }

    pub fn failure(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        error: impl Into<CapturedError>,
    ) -> Self {
        Self {
            start_time,
            end_time,
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
