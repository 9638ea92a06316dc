// crates/server/src/jobs/timeout.rs
//! Timeout policies driving subprocess termination.
//!
//! Two mutually exclusive policies, picked per job kind at creation:
//! an absolute deadline armed once at start (login checks), and an
//! inactivity deadline re-armed on every observed output line (full syncs).

use std::time::Duration;

use tokio::time::Instant;

/// Which deadline semantics a job runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Fixed deadline from job start, independent of activity.
    Absolute { after: Duration },
    /// Deadline reset on every observed line; fires only on silence.
    Inactivity { idle: Duration },
}

/// An armed deadline for one job, owned by its supervisor task.
///
/// Dropping the supervisor drops the deadline, so there is no detached timer
/// that could fire after the job finished.
#[derive(Debug)]
pub struct Deadline {
    policy: TimeoutPolicy,
    at: Instant,
    armed: bool,
}

impl Deadline {
    pub fn new(policy: TimeoutPolicy) -> Self {
        let after = match policy {
            TimeoutPolicy::Absolute { after } => after,
            TimeoutPolicy::Inactivity { idle } => idle,
        };
        Self {
            policy,
            at: Instant::now() + after,
            armed: true,
        }
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self.policy, TimeoutPolicy::Absolute { .. })
    }

    /// Re-arm on observed output. No-op for the absolute policy.
    pub fn record_activity(&mut self) {
        if let TimeoutPolicy::Inactivity { idle } = self.policy {
            self.at = Instant::now() + idle;
        }
    }

    /// Permanently disable the deadline (termination already underway).
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Resolves when the deadline passes; pends forever once disarmed.
    pub async fn expired(&self) {
        if self.armed {
            tokio::time::sleep_until(self.at).await;
        } else {
            std::future::pending::<()>().await;
        }
    }
}
