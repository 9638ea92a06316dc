// crates/server/src/jobs/invocation.rs
//! imapsync argument construction.
//!
//! Every caller-supplied field is passed as its own argv entry through
//! `tokio::process::Command`. No shell is ever involved, so field content
//! cannot be reinterpreted as additional arguments or commands.

use std::path::Path;

use super::types::{JobKind, JobParams};

/// Build the full imapsync argument list for one job.
///
/// Fixed flags per kind: sync jobs get `--nolog` (the feed is the log) and,
/// when a work dir was established, `--tmpdir` pointing at it so the tool's
/// own shutdown hook can see the job-scoped abort marker. Check jobs get
/// `--justlogin` and the same `--nolog`.
pub fn build_args(kind: JobKind, params: &JobParams, work_dir: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "--host1".to_string(),
        params.host1.clone(),
        "--user1".to_string(),
        params.user1.clone(),
        "--password1".to_string(),
        params.password1.clone(),
        "--host2".to_string(),
        params.host2.clone(),
        "--user2".to_string(),
        params.user2.clone(),
        "--password2".to_string(),
        params.password2.clone(),
        "--nolog".to_string(),
    ];

    if kind == JobKind::Check {
        args.push("--justlogin".to_string());
    }
    if params.debug {
        args.push("--debug".to_string());
    }
    if params.skip_tls_verify {
        args.push("--nosslcheck".to_string());
    }
    if let Some(dir) = work_dir {
        args.push("--tmpdir".to_string());
        args.push(dir.display().to_string());
    }

    args
}
