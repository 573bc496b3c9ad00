//! Per-connection suspension bookkeeping.
//!
//! # State Transitions
//! ```text
//! Inactive → Active: connect failure, or failed_attempts > max_consecutive_failures
//! Active → Expired: deadline passes
//! Expired → Inactive: re-establish succeeds
//! Expired → Active: re-establish fails (failure suspension re-armed)
//! ```
//!
//! # Design Decisions
//! - Fixed-duration suspensions, no exponential growth
//! - Pure state: the connection decides when to probe

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ResilienceConfig;
use crate::observability::metrics;

/// Result of checking a suspension against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionStatus {
    Inactive,
    Active { remaining: Duration },
    /// Deadline passed; the connection should try to re-establish.
    Expired,
}

/// Why a suspension was armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionReason {
    ConnectFailure,
    ConsecutiveFailures,
}

impl SuspensionReason {
    fn as_str(&self) -> &'static str {
        match self {
            SuspensionReason::ConnectFailure => "connect_failure",
            SuspensionReason::ConsecutiveFailures => "consecutive_failures",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Suspension {
    until: Option<Instant>,
    failed_attempts: u32,
    max_failures: u32,
    connect_failure_duration: Duration,
    failure_duration: Duration,
}

impl Suspension {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            until: None,
            failed_attempts: 0,
            max_failures: config.max_consecutive_failures,
            connect_failure_duration: config.connect_failure_suspension(),
            failure_duration: config.failure_suspension(),
        }
    }

    pub fn status(&self) -> SuspensionStatus {
        self.status_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> SuspensionStatus {
        match self.until {
            None => SuspensionStatus::Inactive,
            Some(until) if now < until => SuspensionStatus::Active {
                remaining: until - now,
            },
            Some(_) => SuspensionStatus::Expired,
        }
    }

    pub fn arm(&mut self, reason: SuspensionReason) {
        let duration = match reason {
            SuspensionReason::ConnectFailure => self.connect_failure_duration,
            SuspensionReason::ConsecutiveFailures => self.failure_duration,
        };
        self.until = Some(Instant::now() + duration);
        metrics::record_suspension(reason.as_str());
        tracing::debug!(reason = reason.as_str(), duration = ?duration, "Suspension armed");
    }

    /// Lift the suspension after a successful establish.
    pub fn clear(&mut self) {
        if self.until.take().is_some() {
            tracing::debug!("Suspension cleared");
        }
    }

    /// Count a failed request. Arms the failure suspension once the count exceeds the limit.
    pub fn record_failure(&mut self) -> bool {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        if self.failed_attempts > self.max_failures {
            self.arm(SuspensionReason::ConsecutiveFailures);
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.failed_attempts = 0;
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }
}
