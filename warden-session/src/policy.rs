//! Grace-period rules.

use crate::config::SessionConfig;
use chrono::{DateTime, Duration, Utc};
use std::time::Duration as StdDuration;

/// The two timers that gate security decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePolicy {
    protection_grace: Duration,
    regeneration_grace: Duration,
}

impl GracePolicy {
    pub fn new(protection_grace: StdDuration, regeneration_grace: StdDuration) -> Self {
        Self {
            protection_grace: to_chrono(protection_grace),
            regeneration_grace: to_chrono(regeneration_grace),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.protection_grace, config.regeneration_grace)
    }

    /// Whether a sensitive action is allowed for an identity that
    /// authenticated at `authenticated_at`.
    ///
    /// Evaluated fresh on every call; nothing is remembered between checks.
    pub fn permits_sensitive(
        &self,
        authenticated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        authenticated_at.is_some_and(|at| now - at <= self.protection_grace)
    }

    /// Whether an id issued at `last_rotation` must be rotated.
    pub fn needs_rotation(&self, last_rotation: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last_rotation > self.regeneration_grace
    }
}

impl Default for GracePolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

fn to_chrono(duration: StdDuration) -> Duration {
    Duration::from_std(duration).unwrap_or(Duration::MAX)
}
