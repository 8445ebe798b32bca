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


//! Segmented download pipeline
//!
//! This module fetches a selected source as fixed-size segments and joins
//! them into one output file.
//!
//! # Pipeline
//! - [`token`] - per-segment access tokens
//! - [`resume`] - which segments are already on disk
//! - [`fetcher`] - bounded, fail-fast concurrent segment fetch
//! - [`assembler`] - ordered merge and temp directory cleanup
//! - [`progress`] - snapshots and the publisher that carries them
//! - [`transport`] - HTTP seam used by the fetcher
//! - [`manager`] - orchestration of the steps above
//!
//! # On-disk Layout
//! ```text
//! <output dir>/temp_{slug}_{label}/segment_0
//! <output dir>/temp_{slug}_{label}/segment_1
//! ...
//! ```
//! A segment file shorter than [`FRAGMENT_SIZE`] is treated as incomplete.

pub mod assembler;
pub mod fetcher;
pub mod manager;
pub mod progress;
pub mod resume;
pub mod token;
pub mod transport;

/// Size of one segment in bytes; only the last segment may be shorter
pub const FRAGMENT_SIZE: u64 = 2_097_152;

/// Referer the CDN requires on segment requests
pub const REFERER: &str = "https://abysscdn.com/";

// Re-export commonly used types
pub use assembler::merge_segments;
pub use fetcher::{FetchSummary, SegmentFetcher};
pub use manager::{DownloadConfig, VideoDownloader};
pub use progress::{ProgressPublisher, ProgressSnapshot, ProgressStatus};
pub use resume::{ResumePlanner, ResumeState};
pub use token::SegmentPlan;
pub use transport::{ReqwestTransport, SegmentTransport, TransportResponse};
