// crates/server/src/jobs/mod.rs
//! Job supervision engine.
//!
//! Provides:
//! - `JobRegistry`: process-wide map from job id to job state, the
//!   composition root
//! - `supervisor`: one single-owner task per job owning the subprocess,
//!   its pipes, and every timer
//! - `SubscriberHub`: per-job fan-out with a replay buffer for late joiners
//! - `TimeoutPolicy`/`Deadline`: absolute vs. inactivity deadlines
//! - `invocation`: imapsync argv construction (no shell, ever)

pub mod hub;
pub mod invocation;
pub mod registry;
pub mod supervisor;
pub mod timeout;
pub mod types;

pub use registry::{CancelReason, JobError, JobRegistry};
pub use types::{JobId, JobKind, JobSnapshot, JobStatus, SyncParams};
