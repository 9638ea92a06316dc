// crates/server/src/config.rs
//! Server configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Default port for the server.
const DEFAULT_PORT: u16 = 47311;

/// Inactivity timeout for full-sync jobs: 2 hours of silence.
const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 2 * 60 * 60;

/// Absolute timeout for login-check jobs.
const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 10;

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port (`SYNCVIEW_PORT`, then `PORT`).
    pub port: u16,
    /// Path to the imapsync executable (`SYNCVIEW_IMAPSYNC_BIN`).
    pub imapsync_bin: String,
    /// Inactivity deadline for sync jobs (`SYNCVIEW_SYNC_TIMEOUT_SECS`).
    pub sync_timeout: Duration,
    /// Absolute deadline for login-check jobs. Fixed at 10s in production;
    /// a field so tests can shorten it.
    pub check_timeout: Duration,
    /// Base directory for per-job work dirs (`SYNCVIEW_WORK_DIR`).
    pub work_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("SYNCVIEW_PORT")
            .ok()
            .or_else(|| std::env::var("PORT").ok())
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let imapsync_bin =
            std::env::var("SYNCVIEW_IMAPSYNC_BIN").unwrap_or_else(|_| "imapsync".to_string());

        let sync_timeout = std::env::var("SYNCVIEW_SYNC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS));

        let work_dir = std::env::var("SYNCVIEW_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("syncview"));

        Self {
            port,
            imapsync_bin,
            sync_timeout,
            check_timeout: Duration::from_secs(DEFAULT_CHECK_TIMEOUT_SECS),
            work_dir,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            imapsync_bin: "imapsync".to_string(),
            sync_timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS),
            check_timeout: Duration::from_secs(DEFAULT_CHECK_TIMEOUT_SECS),
            work_dir: std::env::temp_dir().join("syncview"),
        }
    }
}
