// crates/server/src/jobs/supervisor.rs
//! Single-owner supervision task for one subprocess.
//!
//! Each job gets exactly one spawned task that owns the `Child`, both pipe
//! readers, the timeout deadline, the keepalive and abort-poll intervals,
//! and the grace timer. All of them live and die with the task, so no timer
//! can fire against a job after its terminal event.
//!
//! Subprocess state machine: spawned -> running -> one of exited-clean,
//! exited-error, terminated-graceful (SIGTERM), terminated-forced (SIGKILL
//! after the grace window). All four funnel into job status `Finished`.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use syncview_core::{FeedEvent, LineSplitter, ProgressEstimator};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

use crate::config::Config;

use super::invocation;
use super::registry::{CancelReason, JobShared};
use super::timeout::{Deadline, TimeoutPolicy};
use super::types::{JobKind, JobParams, JobStatus};

/// Heartbeat cadence on the subscriber feed.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Grace window between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// How often the cooperative abort marker is checked.
const ABORT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long pipes are drained after process exit. A grandchild that
/// inherited the pipe could otherwise hold the supervisor open forever.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reported instead of the natural exit code when the absolute deadline
/// killed the job. Outside the 0-113 range imapsync itself uses.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Name of the abort marker inside a job's work dir. Its mere existence
/// means "please stop"; content is diagnostic only.
pub(crate) const ABORT_MARKER: &str = "abort";

/// What the select loop decided to do, applied after the loop's borrows end.
enum Action {
    DeadlineFired,
    AbortMarkerSeen,
    Cancelled(CancelReason),
    ForceKill,
}

/// Supervise one job from spawn to terminal broadcast.
pub(crate) async fn run(
    job: Arc<JobShared>,
    params: JobParams,
    config: Arc<Config>,
    mut control_rx: mpsc::UnboundedReceiver<CancelReason>,
) {
    // Cooperative abort channel, sync jobs only. If the work dir cannot be
    // created the job still runs; cancellation falls back to signals.
    let mut work_dir: Option<PathBuf> = None;
    if job.kind == JobKind::Sync {
        let dir = config.work_dir.join(&job.id);
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                job.lock_state().abort_path = Some(dir.join(ABORT_MARKER));
                work_dir = Some(dir);
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    error = %e,
                    "could not establish abort channel; falling back to signals"
                );
            }
        }
    }
    let abort_path = job.lock_state().abort_path.clone();

    let args = invocation::build_args(job.kind, &params, work_dir.as_deref());
    let mut child = match Command::new(&config.imapsync_bin)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "failed to spawn imapsync");
            finish_without_exit(
                &job,
                work_dir.as_deref(),
                format!("[syncview] failed to start {}: {}", config.imapsync_bin, e),
            );
            return;
        }
    };
    tracing::info!(job_id = %job.id, kind = ?job.kind, pid = ?child.id(), "imapsync spawned");
    job.lock_state().status = JobStatus::Running;

    let (mut stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(out), Some(err)) => (out, err),
        _ => {
            let _ = child.start_kill();
            finish_without_exit(
                &job,
                work_dir.as_deref(),
                "[syncview] could not capture subprocess output".to_string(),
            );
            return;
        }
    };

    let policy = match job.kind {
        JobKind::Sync => TimeoutPolicy::Inactivity {
            idle: config.sync_timeout,
        },
        JobKind::Check => TimeoutPolicy::Absolute {
            after: config.check_timeout,
        },
    };
    let mut deadline = Deadline::new(policy);

    let mut out_split = LineSplitter::new();
    let mut err_split = LineSplitter::new();
    let mut out_buf = vec![0u8; 8192];
    let mut err_buf = vec![0u8; 8192];
    let mut out_eof = false;
    let mut err_eof = false;
    let mut estimator = ProgressEstimator::new();

    let start = Instant::now();
    let mut keepalive = interval_at(start + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
    let mut abort_poll = interval_at(start + ABORT_POLL_INTERVAL, ABORT_POLL_INTERVAL);

    let mut exited = false;
    let mut exit_status: Option<std::process::ExitStatus> = None;
    let mut termination_started = false;
    let mut control_closed = false;
    let mut grace_at: Option<Instant> = None;
    let mut drain_at: Option<Instant> = None;

    loop {
        let mut action: Option<Action> = None;
        let mut activity = false;

        tokio::select! {
            read = stdout.read(&mut out_buf), if !out_eof => match read {
                Ok(0) => out_eof = true,
                Ok(n) => {
                    for line in out_split.push(&out_buf[..n]) {
                        deliver_line(&job, &mut estimator, line);
                    }
                    activity = true;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "stdout read failed");
                    out_eof = true;
                }
            },
            read = stderr.read(&mut err_buf), if !err_eof => match read {
                Ok(0) => err_eof = true,
                Ok(n) => {
                    for line in err_split.push(&err_buf[..n]) {
                        deliver_line(&job, &mut estimator, line);
                    }
                    activity = true;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "stderr read failed");
                    err_eof = true;
                }
            },
            waited = child.wait(), if !exited => {
                exited = true;
                drain_at = Some(Instant::now() + DRAIN_TIMEOUT);
                match waited {
                    Ok(status) => exit_status = Some(status),
                    Err(e) => tracing::warn!(job_id = %job.id, error = %e, "wait failed"),
                }
            },
            _ = deadline.expired(), if !exited && !termination_started => {
                action = Some(Action::DeadlineFired);
            },
            _ = keepalive.tick() => {
                job.lock_state().hub.send_live(FeedEvent::Keepalive {
                    ts: chrono::Utc::now().timestamp_millis(),
                });
            },
            _ = abort_poll.tick(), if abort_path.is_some() && !exited && !termination_started => {
                if abort_path.as_deref().is_some_and(Path::exists) {
                    action = Some(Action::AbortMarkerSeen);
                }
            },
            reason = control_rx.recv(), if !control_closed && !exited && !termination_started => {
                match reason {
                    Some(reason) => action = Some(Action::Cancelled(reason)),
                    None => control_closed = true,
                }
            },
            _ = sleep_until_opt(grace_at), if grace_at.is_some() => {
                action = Some(Action::ForceKill);
            },
            _ = sleep_until_opt(drain_at), if drain_at.is_some() => break,
        }

        if activity {
            deadline.record_activity();
        }

        match action {
            Some(Action::DeadlineFired) => {
                if deadline.is_absolute() {
                    job.lock_state().timed_out = true;
                    termination_started = true;
                    deadline.disarm();
                    grace_at = Some(Instant::now() + KILL_GRACE);
                    send_term(&job, &child, "absolute deadline reached");
                } else {
                    job.lock_state().cancelled = true;
                    deadline.disarm();
                    // Prefer the cooperative channel so the tool can run its
                    // own shutdown hook; the 2s poll picks the marker up and
                    // escalates from there.
                    let wrote_marker = abort_path
                        .as_deref()
                        .map(|p| std::fs::write(p, b"inactivity timeout\n"))
                        .map_or(false, |r| r.is_ok());
                    if wrote_marker {
                        job.lock_state().hub.broadcast(FeedEvent::Line {
                            line: "[syncview] inactivity timeout: abort requested".to_string(),
                        });
                    } else {
                        termination_started = true;
                        grace_at = Some(Instant::now() + KILL_GRACE);
                        send_term(&job, &child, "inactivity timeout");
                    }
                }
            }
            Some(Action::AbortMarkerSeen) => {
                job.lock_state().cancelled = true;
                termination_started = true;
                deadline.disarm();
                grace_at = Some(Instant::now() + KILL_GRACE);
                send_term(&job, &child, "abort requested");
            }
            Some(Action::Cancelled(reason)) => {
                job.lock_state().cancelled = true;
                termination_started = true;
                deadline.disarm();
                grace_at = Some(Instant::now() + KILL_GRACE);
                let why = match reason {
                    CancelReason::Caller => "cancelled by caller",
                    CancelReason::Shutdown => "server shutting down",
                };
                send_term(&job, &child, why);
            }
            Some(Action::ForceKill) => {
                grace_at = None;
                tracing::warn!(job_id = %job.id, "grace window elapsed, sending SIGKILL");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(job_id = %job.id, error = %e, "SIGKILL failed");
                }
            }
            None => {}
        }

        if exited && out_eof && err_eof {
            break;
        }
    }

    // Trailing non-terminated fragment: flushed for the streaming check
    // variant, dropped for buffered sync output.
    if job.kind == JobKind::Check {
        if let Some(fragment) = out_split.finish() {
            deliver_line(&job, &mut estimator, fragment);
        }
        if let Some(fragment) = err_split.finish() {
            deliver_line(&job, &mut estimator, fragment);
        }
    }

    finish(&job, exit_status, work_dir.as_deref());
}

/// Push one completed line to subscribers and through the estimator.
fn deliver_line(job: &JobShared, estimator: &mut ProgressEstimator, line: String) {
    let snapshot = estimator.observe(&line);
    let mut st = job.lock_state();
    st.hub.broadcast(FeedEvent::Line { line });
    if let Some(snapshot) = snapshot {
        st.progress = snapshot;
        st.hub.broadcast(FeedEvent::progress(snapshot));
    }
}

/// Step 2+3 of the escalation: diagnostic line, then SIGTERM.
fn send_term(job: &JobShared, child: &Child, reason: &str) {
    tracing::info!(job_id = %job.id, reason, "terminating subprocess");
    job.lock_state().hub.broadcast(FeedEvent::Line {
        line: format!("[syncview] terminating job: {reason}"),
    });
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!(job_id = %job.id, pid, error = %e, "SIGTERM failed");
        }
    }
}

/// Terminal transition with an observed exit status.
fn finish(job: &JobShared, exit_status: Option<std::process::ExitStatus>, work_dir: Option<&Path>) {
    let (mut code, mut signal) = match exit_status {
        Some(status) => (status.code(), status.signal()),
        None => (None, None),
    };

    let mut st = job.lock_state();
    st.status = JobStatus::Finished;
    st.abort_path = None;
    let cancelled = st.cancelled;
    let timed_out = st.timed_out;
    if timed_out {
        // Distinguished code instead of whatever the killed process returned.
        code = Some(TIMEOUT_EXIT_CODE);
        signal = None;
    }
    st.hub.close(FeedEvent::Done {
        code,
        signal,
        cancelled,
        timed_out,
    });
    drop(st);

    cleanup_work_dir(job, work_dir);

    let elapsed = (chrono::Utc::now() - job.created_at).num_milliseconds() as f64 / 1000.0;
    tracing::info!(
        job_id = %job.id,
        ?code,
        ?signal,
        cancelled,
        timed_out,
        elapsed_secs = elapsed,
        "job finished"
    );
}

/// Terminal transition for jobs that never produced an exit status
/// (spawn failure, unusable pipes). No retry.
fn finish_without_exit(job: &JobShared, work_dir: Option<&Path>, diagnostic: String) {
    tracing::warn!(job_id = %job.id, "{diagnostic}");
    let mut st = job.lock_state();
    st.status = JobStatus::Finished;
    st.abort_path = None;
    let cancelled = st.cancelled;
    st.hub.broadcast(FeedEvent::Line { line: diagnostic });
    st.hub.close(FeedEvent::Done {
        code: None,
        signal: None,
        cancelled,
        timed_out: false,
    });
    drop(st);
    cleanup_work_dir(job, work_dir);
}

/// Remove the job's work dir (and with it the abort marker), no matter who
/// created the marker.
fn cleanup_work_dir(job: &JobShared, work_dir: Option<&Path>) {
    if let Some(dir) = work_dir {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %job.id, error = %e, "work dir cleanup failed");
            }
        }
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
