use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{MemberIdentity, Result, RoleguardError};

/// Lease timing parameters shared by every member of an election group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionTimings {
    /// How long a non-renewed lease stays valid for other members
    pub lease_duration: Duration,

    /// How long the holder keeps retrying renewal before giving up
    pub renew_deadline: Duration,

    /// Wait between acquisition or renewal attempts
    pub retry_period: Duration,
}

impl Default for ElectionTimings {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(5),
        }
    }
}

impl ElectionTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn with_renew_deadline(mut self, deadline: Duration) -> Self {
        self.renew_deadline = deadline;
        self
    }

    pub fn with_retry_period(mut self, period: Duration) -> Self {
        self.retry_period = period;
        self
    }

    /// Checks that all durations are positive and ordered
    /// `retry_period < renew_deadline < lease_duration`.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("lease duration", self.lease_duration),
            ("renew deadline", self.renew_deadline),
            ("retry period", self.retry_period),
        ] {
            if value.is_zero() {
                return Err(RoleguardError::config(format!("{name} must be positive")));
            }
        }

        if self.renew_deadline >= self.lease_duration {
            return Err(RoleguardError::config(format!(
                "renew deadline ({:?}) must be shorter than lease duration ({:?})",
                self.renew_deadline, self.lease_duration
            )));
        }

        if self.retry_period >= self.renew_deadline {
            return Err(RoleguardError::config(format!(
                "retry period ({:?}) must be shorter than renew deadline ({:?})",
                self.retry_period, self.renew_deadline
            )));
        }

        Ok(())
    }
}

/// Process-wide election configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    pub identity: MemberIdentity,
    pub timings: ElectionTimings,
}

impl ElectionConfig {
    /// Validates the timings and bundles them with the identity.
    pub fn new(identity: MemberIdentity, timings: ElectionTimings) -> Result<Self> {
        timings.validate()?;
        Ok(Self { identity, timings })
    }
}
