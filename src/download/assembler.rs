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


//! Segment assembly
//!
//! Appends every `segment_<index>` file of a temp directory to the output in
//! numeric index order (`segment_10` after `segment_9`), then removes the temp
//! directory. A failed merge is an error; failed cleanup is only logged.

use crate::download::resume::segment_index;
use crate::error::{AbyssError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{self, AsyncWriteExt, BufWriter};
use tracing::{info, warn};

/// Segment files of `dir`, sorted by index
async fn sorted_segments(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| {
        AbyssError::assembly(format!("Failed to read {}: {}", dir.display(), e))
    })?;

    let mut segments = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        AbyssError::assembly(format!("Failed to read entry in {}: {}", dir.display(), e))
    })? {
        if let Some(index) = entry.file_name().to_str().and_then(segment_index) {
            segments.push((index, entry.path()));
        }
    }

    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}

/// Merge the segments of `temp_dir` into `output` and remove `temp_dir`
///
/// Returns the number of bytes appended to `output`.
///
/// # Errors
/// - AssemblyError if the directory cannot be listed or a segment cannot be
///   copied into the output
pub async fn merge_segments(temp_dir: &Path, output: &Path) -> Result<u64> {
    let segments = sorted_segments(temp_dir).await?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .await
        .map_err(|e| {
            AbyssError::assembly(format!("Failed to open {}: {}", output.display(), e))
        })?;
    let mut writer = BufWriter::new(file);

    let mut total = 0u64;
    for (index, path) in &segments {
        let mut segment = File::open(path).await.map_err(|e| {
            AbyssError::assembly(format!("Failed to open segment {}: {}", index, e))
        })?;
        total += io::copy(&mut segment, &mut writer).await.map_err(|e| {
            AbyssError::assembly(format!("Failed to append segment {}: {}", index, e))
        })?;
    }

    writer
        .flush()
        .await
        .map_err(|e| AbyssError::assembly(format!("Failed to flush output: {}", e)))?;

    info!(
        segments = segments.len(),
        bytes = total,
        output = %output.display(),
        "Segments merged"
    );

    cleanup_temp_dir(temp_dir, &segments).await;
    Ok(total)
}

/// Delete merged segments and the directory; failures are logged
async fn cleanup_temp_dir(temp_dir: &Path, segments: &[(usize, PathBuf)]) {
    for (_, path) in segments {
        if let Err(e) = fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "Failed to delete segment");
        }
    }

    if let Err(e) = fs::remove_dir(temp_dir).await {
        warn!(dir = %temp_dir.display(), error = %e, "Failed to delete temporary folder");
    }
}
