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


//! Resume planning from segment files already on disk
//!
//! A previous run leaves `temp_{slug}_{label}/segment_<index>` files behind.
//! Before fetching, every segment file shorter than [`FRAGMENT_SIZE`] is
//! deleted (it may be a torn write). The remaining indices count as done.
//!
//! The short final segment of a source is deleted by the same rule and is
//! fetched again on every resume.

use crate::download::token::SegmentPlan;
use crate::download::FRAGMENT_SIZE;
use crate::error::Result;
use crate::file::paths::sanitize_path_component;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

lazy_static::lazy_static! {
    static ref SEGMENT_FILE: Regex = Regex::new(r"^segment_(\d+)$").expect("valid segment regex");
}

/// Parse the index out of a `segment_<index>` file name
pub fn segment_index(file_name: &str) -> Option<usize> {
    SEGMENT_FILE
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// File name used for one segment
pub fn segment_file_name(index: usize) -> String {
    format!("segment_{}", index)
}

/// On-disk state of one download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeState {
    /// Directory holding the segment files
    pub temp_directory: PathBuf,

    /// Indices with a complete segment file
    pub completed: BTreeSet<usize>,

    /// Indices in `[0, total)` that still have to be fetched
    pub missing: Vec<usize>,
}

impl ResumeState {
    /// Indices to request for this run
    ///
    /// An empty missing list is treated as unknown state and the whole plan
    /// is fetched again.
    pub fn segments_to_fetch(&self, plan: &SegmentPlan) -> Vec<usize> {
        if self.missing.is_empty() {
            return plan.indices();
        }
        self.missing
            .iter()
            .copied()
            .filter(|index| plan.token(*index).is_some())
            .collect()
    }

    /// Whether an earlier run left segments behind
    pub fn is_resumed(&self) -> bool {
        !self.completed.is_empty()
    }
}

/// Inspects and prepares the temp directory of a download
pub struct ResumePlanner;

impl ResumePlanner {
    /// Scan (or create) `root/temp_{slug}_{label}` for `total` segments
    ///
    /// # Errors
    /// - IoError if the directory cannot be created, listed or cleaned
    pub async fn plan(root: &Path, slug: &str, label: &str, total: usize) -> Result<ResumeState> {
        let temp_directory = root.join(format!(
            "temp_{}_{}",
            sanitize_path_component(slug),
            sanitize_path_component(label)
        ));

        if !fs::metadata(&temp_directory)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            info!(dir = %temp_directory.display(), "Creating temporary segment directory");
            fs::create_dir_all(&temp_directory).await?;

            return Ok(ResumeState {
                temp_directory,
                completed: BTreeSet::new(),
                missing: (0..total).collect(),
            });
        }

        let completed = Self::scan_complete_segments(&temp_directory).await?;
        let missing: Vec<usize> = (0..total).filter(|i| !completed.contains(i)).collect();

        info!(
            dir = %temp_directory.display(),
            completed = completed.len(),
            missing = missing.len(),
            "Resuming download from previously fetched segments"
        );

        Ok(ResumeState {
            temp_directory,
            completed,
            missing,
        })
    }

    /// Collect complete segment indices, deleting short files on the way
    async fn scan_complete_segments(dir: &Path) -> Result<BTreeSet<usize>> {
        let mut completed = BTreeSet::new();
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let index = match name.to_str().and_then(segment_index) {
                Some(index) => index,
                None => continue,
            };

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            if metadata.len() < FRAGMENT_SIZE {
                debug!(index, len = metadata.len(), "Deleting incomplete segment");
                fs::remove_file(entry.path()).await?;
                continue;
            }

            completed.insert(index);
        }

        Ok(completed)
    }
}
