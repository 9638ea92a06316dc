// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::jobs::JobRegistry;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Registry owning every job and its supervisor task.
    pub registry: Arc<JobRegistry>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            registry: Arc::new(JobRegistry::new(config)),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
