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


//! Download orchestration
//!
//! # Pipeline
//! 1. Select the source matching the configured resolution
//! 2. Generate one token per segment
//! 3. Inspect `temp_{slug}_{label}` next to the output for finished segments
//! 4. Fetch the remaining segments concurrently
//! 5. Merge into the output file and remove the temp directory
//!
//! # Progress
//! A `starting` snapshot is published first, `downloading` snapshots while
//! segments are fetched, and one final `completed` or `error` snapshot.

use crate::download::assembler::merge_segments;
use crate::download::fetcher::{SegmentFetcher, DEFAULT_MAX_CONCURRENCY};
use crate::download::progress::{ProgressPublisher, ProgressSnapshot};
use crate::download::resume::ResumePlanner;
use crate::download::token::SegmentPlan;
use crate::download::transport::{ReqwestTransport, SegmentTransport};
use crate::error::{AbyssError, Result};
use crate::media::models::{display_or_null, DecryptedMediaMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Download configuration
///
/// Missing fields take their defaults when loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Page URL the envelope was taken from
    pub source_url: String,

    /// Source label to download (e.g. "720p")
    pub resolution: String,

    /// Output file; its parent directory also holds the temp directory
    pub output_path: PathBuf,

    /// Extra headers for segment requests
    pub headers: HashMap<String, String>,

    /// Segments fetched at once
    pub max_concurrency: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            resolution: String::new(),
            output_path: PathBuf::new(),
            headers: HashMap::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl DownloadConfig {
    /// Load a config from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AbyssError::InvalidConfiguration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            AbyssError::InvalidConfiguration(format!("Invalid config {}: {}", path.display(), e))
        })
    }

    /// Check the fields the pipeline relies on
    ///
    /// Whether `output_path` may be written is left to
    /// [`crate::file::paths::validate_output_path`].
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(AbyssError::InvalidConfiguration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.resolution.trim().is_empty() {
            return Err(AbyssError::InvalidConfiguration(
                "resolution must not be empty".to_string(),
            ));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(AbyssError::InvalidConfiguration(
                "output_path must not be empty".to_string(),
            ));
        }
        if !self.source_url.is_empty() {
            url::Url::parse(&self.source_url).map_err(|e| {
                AbyssError::InvalidConfiguration(format!(
                    "Invalid source_url '{}': {}",
                    self.source_url, e
                ))
            })?;
        }
        Ok(())
    }

    /// Directory holding the temp segment directory
    fn work_dir(&self) -> PathBuf {
        match self.output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// What a finished download did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub output_path: PathBuf,

    /// Segments of the selected source
    pub segments_total: usize,

    /// Segments found complete on disk before fetching
    pub segments_resumed: usize,

    /// Segments fetched in this run
    pub segments_fetched: usize,

    /// Bytes written to the output file
    pub bytes_written: u64,
}

/// Runs the segment pipeline for decrypted media metadata
pub struct VideoDownloader {
    transport: Arc<dyn SegmentTransport>,
    report_interval: Option<Duration>,
}

impl VideoDownloader {
    pub fn new(transport: Arc<dyn SegmentTransport>) -> Self {
        Self {
            transport,
            report_interval: None,
        }
    }

    /// Downloader using [`ReqwestTransport`]
    pub fn with_default_transport() -> Result<Self> {
        Ok(Self::new(Arc::new(ReqwestTransport::new()?)))
    }

    /// Override the interval between `downloading` snapshots
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = Some(interval);
        self
    }

    /// Download `config.resolution` of `metadata` into `config.output_path`
    ///
    /// Publishes `starting`, then `downloading` snapshots, then `completed` or
    /// `error`. On error, finished segments stay in the temp directory.
    pub async fn download(
        &self,
        config: &DownloadConfig,
        metadata: &DecryptedMediaMetadata,
        publisher: &ProgressPublisher,
    ) -> Result<DownloadOutcome> {
        let starting = ProgressSnapshot::starting();
        let start_time = starting.start_time;
        publisher.publish(starting);

        match self.run_pipeline(config, metadata, publisher).await {
            Ok(outcome) => {
                publisher.publish(ProgressSnapshot::completed(
                    outcome.segments_fetched,
                    outcome.bytes_written,
                    start_time,
                ));
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "Download failed");
                publisher.publish(ProgressSnapshot::failed(&e, start_time));
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        config: &DownloadConfig,
        metadata: &DecryptedMediaMetadata,
        publisher: &ProgressPublisher,
    ) -> Result<DownloadOutcome> {
        config.validate()?;

        let selected = metadata.select(&config.resolution)?;
        let plan = SegmentPlan::generate(&selected)?;
        if plan.is_empty() {
            return Err(AbyssError::no_source(&config.resolution, metadata.labels()));
        }

        info!(
            url = %config.source_url,
            resolution = %config.resolution,
            segments = plan.len(),
            base_url = %selected.base_url,
            "Starting segmented download"
        );

        let state = ResumePlanner::plan(
            &config.work_dir(),
            &display_or_null(selected.slug.as_ref()),
            &display_or_null(selected.label.as_ref()),
            plan.len(),
        )
        .await?;
        let indices = state.segments_to_fetch(&plan);

        let mut fetcher = SegmentFetcher::new(
            Arc::clone(&self.transport),
            selected,
            publisher.clone(),
        )
        .with_headers(config.headers.clone())
        .with_max_concurrency(config.max_concurrency);
        if let Some(interval) = self.report_interval {
            fetcher = fetcher.with_report_interval(interval);
        }

        let summary = fetcher.run(&plan, &indices, &state.temp_directory).await?;

        info!("Merging segments into mp4 file");
        let bytes_written = merge_segments(&state.temp_directory, &config.output_path).await?;

        Ok(DownloadOutcome {
            output_path: config.output_path.clone(),
            segments_total: plan.len(),
            segments_resumed: state.completed.len(),
            segments_fetched: summary.segments,
            bytes_written,
        })
    }
}
