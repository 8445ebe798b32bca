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


//! Output file naming and validation
//!
//! # Naming
//! - Caller-supplied names are sanitized: characters invalid on common
//!   filesystems (`<>:"/\|?*` and control characters) become `_`
//! - `.mp4` is appended when missing and names are capped at
//!   [`MAX_FILE_NAME_LENGTH`] characters, keeping the extension
//! - Without a name, `{slug}_{resolution}_{timestamp_ms}.mp4` is used
//!
//! # Default Location
//! `$HOME/Downloads`, falling back to `$HOME`, then the current directory.

use crate::error::{AbyssError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Extension of every output file
pub const OUTPUT_EXTENSION: &str = ".mp4";

/// Maximum length of a sanitized file name, extension included
pub const MAX_FILE_NAME_LENGTH: usize = 100;

lazy_static::lazy_static! {
    static ref INVALID_FILE_CHARS: Regex =
        Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("valid file name regex");
}

/// Sanitize a caller-supplied output file name
///
/// Returns `None` for an empty name.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    let cleaned = INVALID_FILE_CHARS.replace_all(name, "_");
    let with_extension = if cleaned.to_lowercase().ends_with(OUTPUT_EXTENSION) {
        cleaned.into_owned()
    } else {
        format!("{}{}", cleaned, OUTPUT_EXTENSION)
    };

    if with_extension.chars().count() > MAX_FILE_NAME_LENGTH {
        let keep = MAX_FILE_NAME_LENGTH - OUTPUT_EXTENSION.len();
        let truncated: String = with_extension.chars().take(keep).collect();
        Some(format!("{}{}", truncated, OUTPUT_EXTENSION))
    } else {
        Some(with_extension)
    }
}

/// Replace path separators and reserved characters in one path component
pub fn sanitize_path_component(component: &str) -> String {
    INVALID_FILE_CHARS.replace_all(component, "_").into_owned()
}

/// `{slug}_{resolution}_{timestamp_ms}.mp4`
pub fn default_file_name(slug: Option<&str>, resolution: &str, timestamp_ms: i64) -> String {
    format!(
        "{}_{}_{}{}",
        slug.unwrap_or("null"),
        resolution,
        timestamp_ms,
        OUTPUT_EXTENSION
    )
}

/// Directory downloads go to when the caller names none
pub fn default_download_dir() -> PathBuf {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));

    match home {
        Some(home) => {
            let home = PathBuf::from(home);
            let downloads = home.join("Downloads");
            if downloads.is_dir() {
                downloads
            } else {
                home
            }
        }
        None => PathBuf::from("."),
    }
}

/// Check that `path` can receive a new output file
///
/// # Errors
/// - InvalidPath if the path ends in a separator, its parent is missing or
///   not a directory, the name is blank, or the extension is not `.mp4`
/// - FileAlreadyExists if something already exists at `path`
pub fn validate_output_path(path: &Path) -> Result<()> {
    let raw = path.to_string_lossy();
    if raw.ends_with('/') || raw.ends_with('\\') {
        return Err(AbyssError::InvalidPath(format!(
            "Output path names a directory: {}",
            raw
        )));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            return Err(AbyssError::InvalidPath(format!(
                "Output directory does not exist: {}",
                parent.display()
            )));
        }
        if !parent.is_dir() {
            return Err(AbyssError::InvalidPath(format!(
                "Output path is not a directory: {}",
                parent.display()
            )));
        }
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.trim().is_empty() {
        return Err(AbyssError::InvalidPath(
            "No valid file name specified".to_string(),
        ));
    }
    if !name.to_lowercase().ends_with(OUTPUT_EXTENSION) {
        return Err(AbyssError::InvalidPath(format!(
            "File must have a .mp4 extension: {}",
            name
        )));
    }

    if path.exists() {
        return Err(AbyssError::FileAlreadyExists(path.display().to_string()));
    }

    Ok(())
}

/// Human-readable size, base 1024 (e.g. "1.50 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let value = bytes as f64;
    if value >= GB {
        format!("{:.2} GB", value / GB)
    } else if value >= MB {
        format!("{:.2} MB", value / MB)
    } else if value >= KB {
        format!("{:.2} KB", value / KB)
    } else {
        format!("{} Bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("my:video?").as_deref(), Some("my_video_.mp4"));
        assert_eq!(sanitize_file_name("a/b\\c").as_deref(), Some("a_b_c.mp4"));
        assert_eq!(sanitize_file_name("clip.MP4").as_deref(), Some("clip.MP4"));
        assert_eq!(sanitize_file_name("tab\there").as_deref(), Some("tab_here.mp4"));
        assert_eq!(sanitize_file_name(""), None);
    }

    #[test]
    fn test_sanitize_caps_length() {
        let name = sanitize_file_name(&"x".repeat(150)).unwrap();
        assert_eq!(name.chars().count(), MAX_FILE_NAME_LENGTH);
        assert!(name.ends_with(".mp4"));
        assert_eq!(&name[..96], "x".repeat(96));
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("x"), "x");
        assert_eq!(sanitize_path_component("../etc"), ".._etc");
        assert_eq!(sanitize_path_component("a\\b:c"), "a_b_c");
    }

    #[test]
    fn test_default_file_name() {
        assert_eq!(
            default_file_name(Some("abc"), "720p", 1_700_000_000_000),
            "abc_720p_1700000000000.mp4"
        );
        assert_eq!(default_file_name(None, "360p", 1), "null_360p_1.mp4");
    }

    #[test]
    fn test_validate_output_path() {
        let dir = TempDir::new().unwrap();

        assert!(validate_output_path(&dir.path().join("video.mp4")).is_ok());
        assert!(validate_output_path(&dir.path().join("video.MP4")).is_ok());

        assert!(matches!(
            validate_output_path(&dir.path().join("video.mkv")),
            Err(AbyssError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_output_path(&dir.path().join("missing").join("video.mp4")),
            Err(AbyssError::InvalidPath(_))
        ));

        let trailing = format!("{}/", dir.path().join("video.mp4").display());
        assert!(matches!(
            validate_output_path(Path::new(&trailing)),
            Err(AbyssError::InvalidPath(_))
        ));

        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            validate_output_path(&file.join("video.mp4")),
            Err(AbyssError::InvalidPath(_))
        ));

        let existing = dir.path().join("existing.mp4");
        std::fs::write(&existing, b"x").unwrap();
        assert!(matches!(
            validate_output_path(&existing),
            Err(AbyssError::FileAlreadyExists(_))
        ));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(2_097_152), "2.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
