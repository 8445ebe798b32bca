// abyss-core - Segmented video downloader core
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Download progress snapshots and publishing
//!
//! # Progress Information
//! - Segments done / segments requested in this run
//! - Bytes downloaded against an estimate (`segments × FRAGMENT_SIZE`)
//! - Percentage, lifecycle status, optional message and error
//! - Start time (Unix milliseconds) for speed and ETA
//!
//! The estimate ignores the shorter final segment, so `percent` can end
//! slightly above or below 100.
//!
//! # Publishing
//! [`ProgressPublisher`] keeps the most recent snapshot. A subscriber first
//! receives that snapshot and then every later one it is awake for;
//! intermediate snapshots may be skipped when the subscriber is slow.

use crate::file::paths::format_bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a download as seen by progress consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Metadata is being resolved and segments planned
    Starting,
    /// Segments are being fetched
    Downloading,
    /// Output file written
    Completed,
    /// Download aborted
    Error,
}

/// Progress snapshot of one download
///
/// Serialized with the field names progress consumers expect
/// (`downloadedSegments`, `mediaSize`, `startTime`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Segments fully written in this run
    pub downloaded_segments: usize,

    /// Segments requested in this run
    pub total_segments: usize,

    /// Bytes written in this run
    pub downloaded_bytes: u64,

    /// `total_segments × FRAGMENT_SIZE`
    #[serde(rename = "mediaSize")]
    pub media_size_estimate: u64,

    /// `downloaded_bytes / media_size_estimate × 100`
    pub percent: f64,

    pub status: ProgressStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Unix time in milliseconds when the run started
    pub start_time: i64,
}

impl ProgressSnapshot {
    /// Snapshot published before any segment is planned
    pub fn starting() -> Self {
        Self {
            downloaded_segments: 0,
            total_segments: 0,
            downloaded_bytes: 0,
            media_size_estimate: 0,
            percent: 0.0,
            status: ProgressStatus::Starting,
            message: Some("Initializing download...".to_string()),
            error: None,
            start_time: now_millis(),
        }
    }

    /// Periodic snapshot while segments are fetched
    pub fn downloading(
        downloaded_segments: usize,
        total_segments: usize,
        downloaded_bytes: u64,
        media_size_estimate: u64,
        start_time: i64,
    ) -> Self {
        let mut snapshot = Self {
            downloaded_segments,
            total_segments,
            downloaded_bytes,
            media_size_estimate,
            percent: 0.0,
            status: ProgressStatus::Downloading,
            message: None,
            error: None,
            start_time,
        };
        snapshot.calculate_percentage();
        snapshot
    }

    /// Final snapshot after the output file is written
    pub fn completed(total_segments: usize, downloaded_bytes: u64, start_time: i64) -> Self {
        Self {
            downloaded_segments: total_segments,
            total_segments,
            downloaded_bytes,
            media_size_estimate: downloaded_bytes,
            percent: 100.0,
            status: ProgressStatus::Completed,
            message: Some("Download completed".to_string()),
            error: None,
            start_time,
        }
    }

    /// Final snapshot for an aborted download
    pub fn failed<E: std::fmt::Display>(error: E, start_time: i64) -> Self {
        let message = format!("Download failed: {}", error);
        Self {
            downloaded_segments: 0,
            total_segments: 0,
            downloaded_bytes: 0,
            media_size_estimate: 0,
            percent: 0.0,
            status: ProgressStatus::Error,
            message: Some(message.clone()),
            error: Some(message),
            start_time,
        }
    }

    /// Recompute `percent` from the byte counters
    pub fn calculate_percentage(&mut self) {
        if self.media_size_estimate > 0 {
            self.percent = self.downloaded_bytes as f64 / self.media_size_estimate as f64 * 100.0;
        } else {
            self.percent = 0.0;
        }
    }

    /// Average speed since `start_time`, measured at `now_ms`
    pub fn speed_at(&self, now_ms: i64) -> f64 {
        let elapsed_ms = now_ms.saturating_sub(self.start_time);
        if elapsed_ms <= 0 {
            return 0.0;
        }
        self.downloaded_bytes as f64 / (elapsed_ms as f64 / 1000.0)
    }

    /// Average speed since the run started, in bytes per second
    pub fn speed_bytes_per_sec(&self) -> f64 {
        self.speed_at(now_millis())
    }

    /// Seconds left at the average speed measured at `now_ms`
    pub fn eta_at(&self, now_ms: i64) -> Option<u64> {
        let speed = self.speed_at(now_ms);
        if speed <= 0.0 || self.media_size_estimate == 0 {
            return None;
        }
        let remaining = self.media_size_estimate.saturating_sub(self.downloaded_bytes);
        Some((remaining as f64 / speed).round() as u64)
    }

    /// Estimated seconds remaining, `None` until bytes have arrived
    pub fn eta_seconds(&self) -> Option<u64> {
        self.eta_at(now_millis())
    }

    /// Format ETA as human-readable string (e.g., "5m 30s")
    pub fn eta_string(eta_seconds: Option<u64>) -> String {
        let eta = match eta_seconds {
            Some(eta) => eta,
            None => return "calculating...".to_string(),
        };

        let hours = eta / 3600;
        let minutes = (eta % 3600) / 60;
        let seconds = eta % 60;

        if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    /// One-line console rendering
    pub fn display_string(&self) -> String {
        self.display_at(now_millis())
    }

    fn display_at(&self, now_ms: i64) -> String {
        match self.status {
            ProgressStatus::Starting => self
                .message
                .clone()
                .unwrap_or_else(|| "Starting".to_string()),
            ProgressStatus::Downloading => format!(
                "{} {:.1}% | {}/{} segments | {} / {} | {}/s | ETA {}",
                progress_bar(self.percent, 30),
                self.percent,
                self.downloaded_segments,
                self.total_segments,
                format_bytes(self.downloaded_bytes),
                format_bytes(self.media_size_estimate),
                format_bytes(self.speed_at(now_ms) as u64),
                Self::eta_string(self.eta_at(now_ms))
            ),
            ProgressStatus::Completed => {
                format!("Completed: {}", format_bytes(self.downloaded_bytes))
            }
            ProgressStatus::Error => self
                .error
                .clone()
                .unwrap_or_else(|| "Download failed".to_string()),
        }
    }
}

/// `[=====>     ]` style bar, clamped to the bar width
fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64) as usize;
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    for i in 0..width {
        bar.push(if i < filled {
            '='
        } else if i == filled {
            '>'
        } else {
            ' '
        });
    }
    bar.push(']');
    bar
}

/// Current Unix time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Carries snapshots from a download to any number of observers
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    sender: Arc<watch::Sender<Option<ProgressSnapshot>>>,
}

impl ProgressPublisher {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Replace the latest snapshot; never blocks, succeeds without subscribers
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        self.sender.send_replace(Some(snapshot));
    }

    /// Most recent snapshot, if any was published
    pub fn latest(&self) -> Option<ProgressSnapshot> {
        self.sender.borrow().clone()
    }

    /// Subscribe; the most recent snapshot is yielded first
    pub fn subscribe(&self) -> ProgressSubscription {
        ProgressSubscription {
            receiver: self.sender.subscribe(),
            replayed: false,
        }
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`ProgressPublisher`]
#[derive(Debug)]
pub struct ProgressSubscription {
    receiver: watch::Receiver<Option<ProgressSnapshot>>,
    replayed: bool,
}

impl ProgressSubscription {
    /// Next snapshot, or `None` once every publisher handle is dropped
    pub async fn next(&mut self) -> Option<ProgressSnapshot> {
        if !self.replayed {
            self.replayed = true;
            if let Some(snapshot) = self.receiver.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }

        loop {
            self.receiver.changed().await.ok()?;
            if let Some(snapshot) = self.receiver.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage() {
        let snapshot = ProgressSnapshot::downloading(1, 4, 2_097_152, 8_388_608, 0);
        assert_eq!(snapshot.percent, 25.0);
        assert_eq!(snapshot.status, ProgressStatus::Downloading);

        let empty = ProgressSnapshot::downloading(0, 0, 10, 0, 0);
        assert_eq!(empty.percent, 0.0);
    }

    #[test]
    fn test_percent_may_exceed_estimate() {
        let snapshot = ProgressSnapshot::downloading(2, 2, 4_200_000, 4_194_304, 0);
        assert!(snapshot.percent > 100.0);
    }

    #[test]
    fn test_speed_and_eta() {
        let snapshot = ProgressSnapshot::downloading(1, 10, 5_000_000, 10_000_000, 1_000);

        // 5 MB in 5 seconds
        assert_eq!(snapshot.speed_at(6_000), 1_000_000.0);
        assert_eq!(snapshot.eta_at(6_000), Some(5));
        assert_eq!(snapshot.speed_at(1_000), 0.0);
        assert_eq!(snapshot.eta_at(1_000), None);
    }

    #[test]
    fn test_eta_string() {
        assert_eq!(ProgressSnapshot::eta_string(None), "calculating...");
        assert_eq!(ProgressSnapshot::eta_string(Some(42)), "42s");
        assert_eq!(ProgressSnapshot::eta_string(Some(330)), "5m 30s");
        assert_eq!(ProgressSnapshot::eta_string(Some(7260)), "2h 1m");
    }

    #[test]
    fn test_lifecycle_snapshots() {
        let starting = ProgressSnapshot::starting();
        assert_eq!(starting.status, ProgressStatus::Starting);
        assert_eq!(starting.message.as_deref(), Some("Initializing download..."));

        let failed = ProgressSnapshot::failed("boom", starting.start_time);
        assert_eq!(failed.status, ProgressStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("Download failed: boom"));
        assert_eq!(failed.display_string(), "Download failed: boom");
    }

    #[test]
    fn test_serialized_field_names() {
        let snapshot = ProgressSnapshot::downloading(1, 2, 3, 4, 5);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["downloadedSegments"], 1);
        assert_eq!(json["totalSegments"], 2);
        assert_eq!(json["downloadedBytes"], 3);
        assert_eq!(json["mediaSize"], 4);
        assert_eq!(json["startTime"], 5);
        assert_eq!(json["status"], "downloading");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_display_downloading() {
        let snapshot = ProgressSnapshot::downloading(1, 2, 2_097_152, 4_194_304, 0);
        let line = snapshot.display_at(2_000);
        assert!(line.starts_with("[===============>"));
        assert!(line.contains("50.0%"));
        assert!(line.contains("1/2 segments"));
        assert!(line.contains("2.00 MB / 4.00 MB"));
    }

    #[test]
    fn test_progress_bar_clamps() {
        assert_eq!(progress_bar(0.0, 4), "[>   ]");
        assert_eq!(progress_bar(150.0, 4), "[====]");
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_latest_snapshot() {
        let publisher = ProgressPublisher::new();
        publisher.publish(ProgressSnapshot::starting());
        publisher.publish(ProgressSnapshot::downloading(1, 2, 10, 20, 0));

        let mut subscription = publisher.subscribe();
        let first = subscription.next().await.unwrap();
        assert_eq!(first.status, ProgressStatus::Downloading);
        assert_eq!(first.downloaded_segments, 1);

        publisher.publish(ProgressSnapshot::completed(2, 20, 0));
        let second = subscription.next().await.unwrap();
        assert_eq!(second.status, ProgressStatus::Completed);

        drop(publisher);
        assert!(subscription.next().await.is_none());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = ProgressPublisher::default();
        assert!(publisher.latest().is_none());
        publisher.publish(ProgressSnapshot::starting());
        assert_eq!(publisher.latest().unwrap().status, ProgressStatus::Starting);
    }
}
