// crates/core/src/feed.rs
//! Subscriber feed wire types.
//!
//! Every observer of a job receives the same event sequence: raw output
//! lines, normalized progress snapshots, a periodic keepalive, and exactly
//! one terminal `done` event after which the channel closes.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::progress::ProgressSnapshot;

/// One event on a job's subscriber feed (serialized to the frontend via SSE).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../bindings/")]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FeedEvent {
    /// Raw output line from the subprocess, opaque to the server.
    Line { line: String },
    /// Normalized progress snapshot.
    Progress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        copied: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        percentage: Option<u8>,
    },
    /// Periodic heartbeat defeating idle-connection timeouts; carries no
    /// job state.
    Keepalive { ts: i64 },
    /// Terminal event: the exit code and/or signal actually observed, plus
    /// the flags telling callers *why* independent of the raw code.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<i32>,
        cancelled: bool,
        timed_out: bool,
    },
}

impl FeedEvent {
    /// SSE event name for this payload.
    pub fn event_name(&self) -> &'static str {
        match self {
            FeedEvent::Line { .. } => "line",
            FeedEvent::Progress { .. } => "progress",
            FeedEvent::Keepalive { .. } => "keepalive",
            FeedEvent::Done { .. } => "done",
        }
    }

    pub fn progress(snapshot: ProgressSnapshot) -> Self {
        FeedEvent::Progress {
            copied: snapshot.copied,
            total: snapshot.total,
            percentage: snapshot.percentage,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, FeedEvent::Done { .. })
    }
}
