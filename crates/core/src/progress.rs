// crates/core/src/progress.rs
//! Progress estimation from unstructured imapsync output.
//!
//! imapsync reports progress two ways. Once it knows the global message
//! count it prints `X/Y msgs left` (or `done`) lines, and those are
//! authoritative. Before that, it prints per-folder lines (`Host1: folder
//! [INBOX] has N messages in total`, `Host2: folder [INBOX] selected N
//! messages, duplicates M`) which we aggregate into an overall estimate.
//!
//! The estimator is a state machine `Unknown -> PerFolder -> Global`:
//! monotonic except for the exits from `Unknown`. Once global figures have
//! been seen, per-folder lines are ignored for the rest of the job.

use std::collections::HashMap;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Which class of imapsync output currently drives the estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Nothing recognized yet.
    Unknown,
    /// Aggregating per-folder totals and selected counts.
    PerFolder,
    /// Global `X/Y msgs` lines seen; authoritative, never reverts.
    Global,
}

/// Normalized progress snapshot sent to subscribers.
///
/// All fields are unset until the estimator has recognized something.
/// `percentage`, when present, is always `round(100 * copied / total)` and
/// lies in `[0, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../bindings/")]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copied: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
}

/// Per-folder bookkeeping while in `PerFolder` mode.
#[derive(Debug, Default)]
struct FolderProgress {
    /// Expected message count, from the `Host1: folder [..] has N` line.
    total: Option<u64>,
    /// selected + duplicates, from the `Host2: folder [..] selected` line.
    /// Clamped to `total` at aggregation time.
    copied: u64,
}

/// Stateful line consumer producing normalized progress snapshots.
pub struct ProgressEstimator {
    mode: ProgressMode,
    folders: HashMap<String, FolderProgress>,
    snapshot: ProgressSnapshot,
    msgs_left: Regex,
    msgs_done: Regex,
    folder_total: Regex,
    folder_selected: Regex,
}

impl ProgressEstimator {
    pub fn new() -> Self {
        Self {
            mode: ProgressMode::Unknown,
            folders: HashMap::new(),
            snapshot: ProgressSnapshot::default(),
            msgs_left: Regex::new(r"(?i)(\d+)/(\d+)\s+msgs left").unwrap(),
            msgs_done: Regex::new(r"(?i)(\d+)/(\d+)\s+msgs done").unwrap(),
            folder_total: Regex::new(r"(?i)Host1: folder \[(.+?)\] has (\d+) messages in total")
                .unwrap(),
            folder_selected: Regex::new(
                r"(?i)Host2: folder \[(.+?)\] selected (\d+) messages, duplicates (\d+)",
            )
            .unwrap(),
        }
    }

    pub fn mode(&self) -> ProgressMode {
        self.mode
    }

    /// The last emitted snapshot (all-unset before any recognized line).
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot
    }

    /// Consume one output line. Returns a snapshot when the line changed
    /// the estimate; unrecognized and invalid lines return `None` without
    /// error. A single bad line must never abort the job.
    pub fn observe(&mut self, line: &str) -> Option<ProgressSnapshot> {
        if let Some(caps) = self.msgs_left.captures(line) {
            let left: u64 = caps[1].parse().ok()?;
            let total: u64 = caps[2].parse().ok()?;
            let copied = total.checked_sub(left)?;
            return self.accept_global(copied, total);
        }
        if let Some(caps) = self.msgs_done.captures(line) {
            let copied: u64 = caps[1].parse().ok()?;
            let total: u64 = caps[2].parse().ok()?;
            return self.accept_global(copied, total);
        }

        // Per-folder signals are only honored until global figures appear.
        if self.mode == ProgressMode::Global {
            return None;
        }

        if let Some(caps) = self.folder_total.captures(line) {
            let name = caps[1].to_string();
            let total: u64 = caps[2].parse().ok()?;
            self.mode = ProgressMode::PerFolder;
            self.folders.entry(name).or_default().total = Some(total);
            return self.aggregate();
        }
        if let Some(caps) = self.folder_selected.captures(line) {
            let name = caps[1].to_string();
            let selected: u64 = caps[2].parse().ok()?;
            let duplicates: u64 = caps[3].parse().ok()?;
            self.mode = ProgressMode::PerFolder;
            self.folders.entry(name).or_default().copied = selected.saturating_add(duplicates);
            return self.aggregate();
        }

        None
    }

    /// Accept a global `copied/total` pair after the validity gates.
    fn accept_global(&mut self, copied: u64, total: u64) -> Option<ProgressSnapshot> {
        if total == 0 || copied > total {
            return None;
        }
        self.mode = ProgressMode::Global;
        self.snapshot = ProgressSnapshot {
            copied: Some(copied),
            total: Some(total),
            percentage: Some(percentage(copied, total)),
        };
        Some(self.snapshot)
    }

    /// Recompute the overall estimate from every tracked folder.
    ///
    /// Emits only once every tracked folder has a known total; partial
    /// folder knowledge never yields a partial global estimate.
    fn aggregate(&mut self) -> Option<ProgressSnapshot> {
        let mut copied_sum = 0u64;
        let mut total_sum = 0u64;
        for folder in self.folders.values() {
            let total = folder.total?;
            total_sum = total_sum.saturating_add(total);
            copied_sum = copied_sum.saturating_add(folder.copied.min(total));
        }
        if total_sum == 0 {
            return None;
        }
        self.snapshot = ProgressSnapshot {
            copied: Some(copied_sum),
            total: Some(total_sum),
            percentage: Some(percentage(copied_sum, total_sum)),
        };
        Some(self.snapshot)
    }
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// `round(100 * copied / total)` for `copied <= total`, `total > 0`.
fn percentage(copied: u64, total: u64) -> u8 {
    ((100.0 * copied as f64 / total as f64).round() as u64).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snap(copied: u64, total: u64, percentage: u8) -> ProgressSnapshot {
        ProgressSnapshot {
            copied: Some(copied),
            total: Some(total),
            percentage: Some(percentage),
        }
    }

    #[test]
    fn msgs_left_switches_to_global() {
        let mut est = ProgressEstimator::new();
        assert_eq!(est.observe("42/42 msgs left"), Some(snap(0, 42, 0)));
        assert_eq!(est.mode(), ProgressMode::Global);
        assert_eq!(est.observe("0/42 msgs left"), Some(snap(42, 42, 100)));
    }

    #[test]
    fn msgs_done_counts_directly() {
        let mut est = ProgressEstimator::new();
        assert_eq!(est.observe("7/10 msgs done"), Some(snap(7, 10, 70)));
        assert_eq!(est.mode(), ProgressMode::Global);
    }

    #[test]
    fn msgs_left_rounding() {
        let mut est = ProgressEstimator::new();
        // copied = 3 - 2 = 1, 100/3 rounds to 33
        assert_eq!(est.observe("2/3 msgs left"), Some(snap(1, 3, 33)));
        // copied = 2, 200/3 rounds to 67
        assert_eq!(est.observe("1/3 msgs left"), Some(snap(2, 3, 67)));
    }

    #[test]
    fn case_insensitive_match() {
        let mut est = ProgressEstimator::new();
        assert_eq!(est.observe("5/10 MSGS LEFT remaining"), Some(snap(5, 10, 50)));
    }

    #[test]
    fn invalid_global_lines_discarded() {
        let mut est = ProgressEstimator::new();
        // total == 0
        assert_eq!(est.observe("0/0 msgs left"), None);
        // done > total
        assert_eq!(est.observe("11/10 msgs done"), None);
        assert_eq!(est.mode(), ProgressMode::Unknown);
        assert_eq!(est.snapshot(), ProgressSnapshot::default());
    }

    #[test]
    fn per_folder_scenario() {
        let mut est = ProgressEstimator::new();
        assert_eq!(
            est.observe("Host1: folder [INBOX] has 10 messages in total"),
            Some(snap(0, 10, 0)),
        );
        assert_eq!(est.mode(), ProgressMode::PerFolder);
        assert_eq!(
            est.observe("Host2: folder [INBOX] selected 7 messages, duplicates 1"),
            Some(snap(8, 10, 80)),
        );
    }

    #[test]
    fn untotaled_folder_suppresses_snapshot() {
        let mut est = ProgressEstimator::new();
        est.observe("Host1: folder [INBOX] has 10 messages in total");
        // A second folder appears without a known total: no more snapshots
        // until its total arrives.
        assert_eq!(
            est.observe("Host2: folder [Sent] selected 3 messages, duplicates 0"),
            None,
        );
        assert_eq!(
            est.observe("Host2: folder [INBOX] selected 5 messages, duplicates 0"),
            None,
        );
        assert_eq!(
            est.observe("Host1: folder [Sent] has 4 messages in total"),
            Some(snap(8, 14, 57)),
        );
    }

    #[test]
    fn selected_clamped_to_folder_total() {
        let mut est = ProgressEstimator::new();
        est.observe("Host1: folder [INBOX] has 5 messages in total");
        assert_eq!(
            est.observe("Host2: folder [INBOX] selected 9 messages, duplicates 2"),
            Some(snap(5, 5, 100)),
        );
    }

    #[test]
    fn global_ignores_later_folder_lines() {
        let mut est = ProgressEstimator::new();
        est.observe("3/10 msgs left");
        let before = est.snapshot();
        assert_eq!(
            est.observe("Host1: folder [INBOX] has 999 messages in total"),
            None,
        );
        assert_eq!(
            est.observe("Host2: folder [INBOX] selected 1 messages, duplicates 0"),
            None,
        );
        assert_eq!(est.snapshot(), before);
        assert_eq!(est.mode(), ProgressMode::Global);
    }

    #[test]
    fn folder_lines_then_global_takes_over() {
        let mut est = ProgressEstimator::new();
        est.observe("Host1: folder [INBOX] has 10 messages in total");
        assert_eq!(est.mode(), ProgressMode::PerFolder);
        assert_eq!(est.observe("4/20 msgs left"), Some(snap(16, 20, 80)));
        assert_eq!(est.mode(), ProgressMode::Global);
    }

    #[test]
    fn unrecognized_lines_ignored() {
        let mut est = ProgressEstimator::new();
        assert_eq!(est.observe(""), None);
        assert_eq!(est.observe("Transfer started on host1"), None);
        assert_eq!(est.observe("msgs left"), None);
        assert_eq!(est.mode(), ProgressMode::Unknown);
    }

    #[test]
    fn huge_numbers_discarded_not_panicking() {
        let mut est = ProgressEstimator::new();
        // Larger than u64: parse fails, line silently discarded.
        assert_eq!(
            est.observe("99999999999999999999999/99999999999999999999999 msgs left"),
            None,
        );
    }

    #[test]
    fn snapshot_serializes_camel_case_and_skips_unset() {
        let s = ProgressSnapshot::default();
        assert_eq!(serde_json::to_string(&s).unwrap(), "{}");
        let s = snap(8, 10, 80);
        assert_eq!(
            serde_json::to_string(&s).unwrap(),
            r#"{"copied":8,"total":10,"percentage":80}"#,
        );
    }
}
