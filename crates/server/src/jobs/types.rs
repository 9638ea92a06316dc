// crates/server/src/jobs/types.rs
//! Types for the job supervision system.

use serde::{Deserialize, Deserializer, Serialize};
use syncview_core::ProgressSnapshot;
use ts_rs::TS;

/// Unique identifier for a job. Opaque, generated at creation, never reused.
pub type JobId = String;

/// What kind of subprocess invocation a job supervises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../bindings/")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Full mailbox migration; inactivity timeout, cooperative abort file.
    Sync,
    /// Credential check (`--justlogin`); absolute 10s timeout.
    Check,
}

/// Job lifecycle: `Pending -> Running -> Finished`, terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "../../../bindings/")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
}

/// Point-in-time view of a job, returned by the query endpoints.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../../../bindings/")]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub cancelled: bool,
    pub timed_out: bool,
    pub progress: ProgressSnapshot,
    pub created_at: String,
}

/// Boolean-like toggle from the request body: accepts JSON `true`/`false`
/// or the strings the legacy form posts (`"on"`, `"true"`, `"1"`, `"yes"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Toggle(pub bool);

impl Toggle {
    pub fn is_on(self) -> bool {
        self.0
    }
}

impl<'de> Deserialize<'de> for Toggle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bool(bool),
            Num(u64),
            Str(String),
        }
        let on = match Repr::deserialize(deserializer)? {
            Repr::Bool(b) => b,
            Repr::Num(n) => n != 0,
            Repr::Str(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "on" | "true" | "1" | "yes"
            ),
        };
        Ok(Toggle(on))
    }
}

/// Caller-supplied job parameters, as posted to the create endpoints.
///
/// Everything is optional at the serde layer so a missing field produces a
/// controlled 400 from `validate()` instead of a framework rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncParams {
    pub host1: Option<String>,
    pub user1: Option<String>,
    pub password1: Option<String>,
    pub host2: Option<String>,
    pub user2: Option<String>,
    pub password2: Option<String>,
    #[serde(default)]
    pub debug: Toggle,
    #[serde(default)]
    pub skip_tls_verify: Toggle,
}

/// Validated, fully-populated parameters handed to the supervisor.
#[derive(Debug, Clone)]
pub struct JobParams {
    pub host1: String,
    pub user1: String,
    pub password1: String,
    pub host2: String,
    pub user2: String,
    pub password2: String,
    pub debug: bool,
    pub skip_tls_verify: bool,
}

impl SyncParams {
    /// Reject missing or empty required fields before any job is created.
    /// Returns the name of the first offending field.
    pub fn validate(self) -> Result<JobParams, &'static str> {
        fn required(
            value: Option<String>,
            name: &'static str,
        ) -> Result<String, &'static str> {
            match value {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => Err(name),
            }
        }
        Ok(JobParams {
            host1: required(self.host1, "host1")?,
            user1: required(self.user1, "user1")?,
            password1: required(self.password1, "password1")?,
            host2: required(self.host2, "host2")?,
            user2: required(self.user2, "user2")?,
            password2: required(self.password2, "password2")?,
            debug: self.debug.is_on(),
            skip_tls_verify: self.skip_tls_verify.is_on(),
        })
    }
}
