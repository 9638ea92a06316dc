// crates/server/src/jobs/registry.rs
//! Process-wide job registry: the composition root gluing supervisor,
//! hub, and timeout policy together per job.
//!
//! The map from id to job is the only state visible across jobs. Jobs are
//! never evicted: they stay queryable for the life of the process. Known
//! gap: under sustained load this grows without bound; an expiry policy
//! would bolt on here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use syncview_core::{FeedEvent, ProgressSnapshot};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Config;

use super::hub::SubscriberHub;
use super::supervisor;
use super::types::{JobId, JobKind, JobParams, JobSnapshot, JobStatus};

/// Why a termination sequence was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Caller,
    Shutdown,
}

/// Errors surfaced synchronously to the caller of a registry operation.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Job {0} is not running")]
    NotRunning(JobId),
}

/// Mutable per-job state, guarded by the job's mutex.
///
/// Locked only for short synchronous sections, never across an await.
pub(crate) struct JobState {
    pub status: JobStatus,
    pub cancelled: bool,
    pub timed_out: bool,
    pub progress: ProgressSnapshot,
    pub hub: SubscriberHub,
    /// Cooperative abort marker path, once the supervisor established the
    /// job's work dir. `None` for check jobs and after the job finished.
    pub abort_path: Option<PathBuf>,
}

/// Immutable identity plus guarded state for one job.
pub(crate) struct JobShared {
    pub id: JobId,
    pub kind: JobKind,
    pub created_at: DateTime<Utc>,
    pub state: Mutex<JobState>,
    /// Direct line to the supervisor task, the signal-based fallback when
    /// the abort marker cannot be written.
    pub control: mpsc::UnboundedSender<CancelReason>,
}

impl JobShared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, JobState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(job_id = %self.id, "job state mutex poisoned");
                poisoned.into_inner()
            }
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        let st = self.lock_state();
        JobSnapshot {
            job_id: self.id.clone(),
            kind: self.kind,
            status: st.status,
            cancelled: st.cancelled,
            timed_out: st.timed_out,
            progress: st.progress,
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

/// Central registry managing all jobs.
pub struct JobRegistry {
    config: Arc<Config>,
    jobs: RwLock<HashMap<JobId, Arc<JobShared>>>,
}

impl JobRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a job and spawn its supervisor task. Params must already be
    /// validated; nothing is rejected past this point.
    pub fn create(&self, kind: JobKind, params: JobParams) -> JobId {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(JobShared {
            id: id.clone(),
            kind,
            created_at: Utc::now(),
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                cancelled: false,
                timed_out: false,
                progress: ProgressSnapshot::default(),
                hub: SubscriberHub::new(),
                abort_path: None,
            }),
            control: control_tx,
        });

        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(id.clone(), Arc::clone(&shared));
            }
            Err(e) => tracing::error!("RwLock poisoned writing jobs map: {e}"),
        }

        tokio::spawn(supervisor::run(
            shared,
            params,
            Arc::clone(&self.config),
            control_rx,
        ));
        tracing::info!(job_id = %id, ?kind, "job created");
        id
    }

    /// Request cancellation. Never blocks on process death; it only
    /// guarantees a termination sequence is initiated.
    pub fn cancel(&self, id: &str) -> Result<(), JobError> {
        let job = self
            .get(id)
            .ok_or_else(|| JobError::UnknownJob(id.to_string()))?;
        self.cancel_job(&job, CancelReason::Caller)
    }

    fn cancel_job(&self, job: &JobShared, reason: CancelReason) -> Result<(), JobError> {
        let abort_path = {
            let mut st = job.lock_state();
            if st.status == JobStatus::Finished {
                return Err(JobError::NotRunning(job.id.clone()));
            }
            st.cancelled = true;
            st.abort_path.clone()
        };

        // Preferred channel: the job-scoped abort marker, visible to the
        // external tool's own shutdown hook. Direct signaling is the
        // fallback when the marker cannot be written.
        if let Some(path) = abort_path {
            match std::fs::write(&path, b"cancel requested\n") {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        error = %e,
                        "abort marker write failed, falling back to direct signal"
                    );
                }
            }
        }
        job.control
            .send(reason)
            .map_err(|_| JobError::NotRunning(job.id.clone()))
    }

    /// Attach a subscriber to a job's feed: buffered replay first, then
    /// the current progress snapshot, then live events.
    pub fn attach(&self, id: &str) -> Option<mpsc::UnboundedReceiver<FeedEvent>> {
        let job = self.get(id)?;
        let mut st = job.lock_state();
        let progress = st.progress;
        Some(st.hub.attach(progress))
    }

    pub fn snapshot(&self, id: &str) -> Option<JobSnapshot> {
        self.get(id).map(|job| job.snapshot())
    }

    /// Snapshots of every job, newest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> = match self.jobs.read() {
            Ok(jobs) => jobs.values().map(|job| job.snapshot()).collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                Vec::new()
            }
        };
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    /// Initiate cancellation of every unfinished job. Used on server
    /// shutdown; errors are ignored (a job finishing concurrently is fine).
    pub fn shutdown(&self) {
        let jobs: Vec<Arc<JobShared>> = match self.jobs.read() {
            Ok(jobs) => jobs.values().cloned().collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                Vec::new()
            }
        };
        let mut cancelled = 0usize;
        for job in jobs {
            if self.cancel_job(&job, CancelReason::Shutdown).is_ok() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::info!(count = cancelled, "shutdown: cancelled running jobs");
        }
    }

    fn get(&self, id: &str) -> Option<Arc<JobShared>> {
        match self.jobs.read() {
            Ok(jobs) => jobs.get(id).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Config pointing at a shell one-liner standing in for imapsync.
    fn fake_tool_config(dir: &tempfile::TempDir, script: &str) -> Config {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("fake-imapsync");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Config {
            imapsync_bin: path.display().to_string(),
            work_dir: dir.path().join("work"),
            ..Config::default()
        }
    }

    fn params() -> JobParams {
        JobParams {
            host1: "h1".into(),
            user1: "u1".into(),
            password1: "p1".into(),
            host2: "h2".into(),
            user2: "u2".into(),
            password2: "p2".into(),
            debug: false,
            skip_tls_verify: false,
        }
    }

    async fn wait_finished(registry: &JobRegistry, id: &str) -> JobSnapshot {
        for _ in 0..200 {
            let snap = registry.snapshot(id).expect("job exists");
            if snap.status == JobStatus::Finished {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("job {id} did not finish in time");
    }

    #[tokio::test]
    async fn create_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_tool_config(&dir, "echo 'Transfer started'");
        let registry = JobRegistry::new(config);

        let id = registry.create(JobKind::Sync, params());
        let snap = wait_finished(&registry, &id).await;
        assert!(!snap.cancelled);
        assert!(!snap.timed_out);
    }

    #[tokio::test]
    async fn global_progress_reaches_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_tool_config(&dir, "echo '42/42 msgs left'; echo '0/42 msgs left'");
        let registry = JobRegistry::new(config);

        let id = registry.create(JobKind::Sync, params());
        let snap = wait_finished(&registry, &id).await;
        assert_eq!(snap.progress.copied, Some(42));
        assert_eq!(snap.progress.total, Some(42));
        assert_eq!(snap.progress.percentage, Some(100));
    }

    #[tokio::test]
    async fn replay_buffer_holds_full_feed_for_late_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_tool_config(&dir, "echo 'line one'; echo '1/2 msgs left'");
        let registry = JobRegistry::new(config);

        let id = registry.create(JobKind::Sync, params());
        wait_finished(&registry, &id).await;

        let mut rx = registry.attach(&id).expect("job exists");
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(events.iter().any(
            |e| matches!(e, FeedEvent::Line { line } if line == "line one")
        ));
        assert!(events
            .iter()
            .any(|e| matches!(e, FeedEvent::Progress { percentage: Some(50), .. })));
        assert!(events.last().is_some_and(FeedEvent::is_done));

        // Drained: a second late subscriber only sees the terminal close.
        let mut rx2 = registry.attach(&id).expect("job exists");
        assert_eq!(rx2.recv().await, None);
    }

    #[tokio::test]
    async fn cancel_unknown_job_fails() {
        let registry = JobRegistry::new(Config::default());
        assert!(matches!(
            registry.cancel("nope"),
            Err(JobError::UnknownJob(_)),
        ));
    }

    #[tokio::test]
    async fn cancel_finished_job_is_wrong_state_and_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_tool_config(&dir, "true");
        let registry = JobRegistry::new(config);

        let id = registry.create(JobKind::Check, params());
        let before = wait_finished(&registry, &id).await;
        assert!(matches!(
            registry.cancel(&id),
            Err(JobError::NotRunning(_)),
        ));
        let after = registry.snapshot(&id).unwrap();
        assert_eq!(after.cancelled, before.cancelled);
        assert_eq!(after.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn cancel_running_check_job_terminates_it() {
        let dir = tempfile::tempdir().unwrap();
        // exec so the sleep receives the SIGTERM directly
        let config = Config {
            check_timeout: Duration::from_secs(60),
            ..fake_tool_config(&dir, "exec sleep 30")
        };
        let registry = JobRegistry::new(config);

        let id = registry.create(JobKind::Check, params());
        tokio::time::sleep(Duration::from_millis(300)).await;
        registry.cancel(&id).expect("cancel running job");

        let snap = wait_finished(&registry, &id).await;
        assert!(snap.cancelled);
        assert!(!snap.timed_out);
    }

    #[tokio::test]
    async fn shutdown_cancels_running_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            check_timeout: Duration::from_secs(60),
            ..fake_tool_config(&dir, "exec sleep 30")
        };
        let registry = JobRegistry::new(config);

        let id = registry.create(JobKind::Check, params());
        tokio::time::sleep(Duration::from_millis(300)).await;
        registry.shutdown();

        let snap = wait_finished(&registry, &id).await;
        assert!(snap.cancelled);
    }

    #[tokio::test]
    async fn absolute_timeout_reports_code_124() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            check_timeout: Duration::from_millis(300),
            ..fake_tool_config(&dir, "exec sleep 30")
        };
        let registry = JobRegistry::new(config);

        let id = registry.create(JobKind::Check, params());
        let snap = wait_finished(&registry, &id).await;
        assert!(snap.timed_out);

        let mut rx = registry.attach(&id).expect("job exists");
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(FeedEvent::Done {
                code: Some(124),
                signal: None,
                cancelled: false,
                timed_out: true,
            }),
        );
    }

    #[tokio::test]
    async fn inactivity_timeout_cancels_silent_sync_job() {
        let dir = tempfile::tempdir().unwrap();
        // Silent process: never writes a line, so nothing re-arms the
        // deadline. Firing writes the abort marker; the 2s poll sees it
        // and escalates to SIGTERM.
        let config = Config {
            sync_timeout: Duration::from_millis(300),
            ..fake_tool_config(&dir, "exec sleep 30")
        };
        let registry = JobRegistry::new(config);

        let id = registry.create(JobKind::Sync, params());
        let snap = wait_finished(&registry, &id).await;
        assert!(snap.cancelled);
        assert!(!snap.timed_out);

        let mut rx = registry.attach(&id).expect("job exists");
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(events.iter().any(
            |e| matches!(e, FeedEvent::Line { line } if line.contains("inactivity timeout"))
        ));
        assert!(matches!(
            events.last(),
            Some(FeedEvent::Done {
                cancelled: true,
                timed_out: false,
                ..
            }),
        ));
    }

    #[tokio::test]
    async fn spawn_failure_is_immediate_terminal() {
        let config = Config {
            imapsync_bin: "/nonexistent/imapsync-definitely-missing".to_string(),
            ..Config::default()
        };
        let registry = JobRegistry::new(config);

        let id = registry.create(JobKind::Check, params());
        let snap = wait_finished(&registry, &id).await;
        assert_eq!(snap.status, JobStatus::Finished);

        let mut rx = registry.attach(&id).expect("job exists");
        let first = rx.recv().await;
        assert!(matches!(
            first,
            Some(FeedEvent::Line { line }) if line.contains("failed to start"),
        ));
    }

    #[tokio::test]
    async fn work_dir_removed_after_sync_job() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_tool_config(&dir, "echo done");
        let work_base = config.work_dir.clone();
        let registry = JobRegistry::new(config);

        let id = registry.create(JobKind::Sync, params());
        wait_finished(&registry, &id).await;
        // Cleanup is synchronous with the terminal transition.
        assert!(!work_base.join(&id).exists());
    }
}
