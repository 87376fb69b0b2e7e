//! Tri-state health status.

use std::fmt;

use serde::Serialize;

/// Health of a supervised unit.
///
/// Variants are declared worst-first, so the derived `Ord` ranks
/// `Unhealthy < Degraded < Healthy` and the worse of two statuses is `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum HealthStatus {
    Unhealthy,
    Degraded,
    Healthy,
}

impl HealthStatus {
    /// The worse of `self` and `other`.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.min(other)
    }

    /// Worst status in `iter`, or `Healthy` when empty.
    pub fn worst_of<I: IntoIterator<Item = Self>>(iter: I) -> Self {
        iter.into_iter().fold(Self::Healthy, Self::worst)
    }

    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Healthy => write!(f, "Healthy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_ranks_unhealthy_lowest() {
        assert!(HealthStatus::Unhealthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Healthy);
    }

    #[test]
    fn worst_picks_lower_rank() {
        use HealthStatus::*;
        assert_eq!(Healthy.worst(Degraded), Degraded);
        assert_eq!(Unhealthy.worst(Degraded), Unhealthy);
        assert_eq!(Healthy.worst(Healthy), Healthy);
        assert_eq!(HealthStatus::worst_of([Healthy, Unhealthy, Degraded]), Unhealthy);
        assert_eq!(HealthStatus::worst_of([]), Healthy);
    }

    #[test]
    fn serializes_as_variant_name() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"Degraded\""
        );
    }
}
