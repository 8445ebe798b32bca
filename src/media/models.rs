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


//! Decrypted media metadata and source selection
//!
//! # JSON Shape
//! The decrypted payload is `{"mp4": {...}}` where the inner object carries:
//! - `domains`: CDN hostnames, the first one is used to build segment URLs
//! - `sources`: one entry per rendition (`label` is the resolution, e.g. `720p`)
//! - `slug`, `md5_id`: replaced by the envelope's values after decryption
//!
//! Every field is optional on the wire; unknown fields are ignored.

use crate::download::FRAGMENT_SIZE;
use crate::error::{AbyssError, Result};
use crate::file::paths::sanitize_path_component;
use serde::{Deserialize, Serialize};

/// Decrypted `mp4` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecryptedMediaMetadata {
    /// CDN hostnames, in order of preference
    #[serde(default)]
    pub domains: Vec<String>,

    /// Available renditions
    #[serde(default)]
    pub sources: Vec<Source>,

    /// Video slug (copied from the envelope)
    #[serde(default)]
    pub slug: Option<String>,

    /// Media id (copied from the envelope)
    #[serde(default)]
    pub md5_id: Option<i64>,
}

/// Wrapper around the decrypted payload
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DecryptedPayload {
    pub mp4: Option<DecryptedMediaMetadata>,
}

/// One rendition of the video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Resolution label (e.g. "360p", "720p")
    pub label: Option<String>,

    pub codec: Option<String>,

    pub path: Option<String>,

    /// Subdomain serving this rendition
    pub sub: Option<String>,

    pub res_id: Option<i64>,

    /// Total media size in bytes
    pub size: Option<i64>,

    pub status: Option<bool>,

    pub url: Option<String>,

    #[serde(rename = "partSize", default, skip_serializing_if = "Option::is_none")]
    pub part_size: Option<i64>,
}

impl Source {
    /// Number of segments this source is split into (0 if size unknown)
    pub fn segment_count(&self) -> usize {
        match self.size {
            Some(size) => segment_count_for(size),
            None => 0,
        }
    }
}

/// `ceil(size / FRAGMENT_SIZE)`, with at least one segment for any known size
pub fn segment_count_for(size: i64) -> usize {
    if size <= FRAGMENT_SIZE as i64 {
        return 1;
    }
    let fragment = FRAGMENT_SIZE as i64;
    (size / fragment + i64::from(size % fragment != 0)) as usize
}

/// Source chosen for download, with the CDN base URL resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedSource {
    pub slug: Option<String>,
    pub md5_id: Option<i64>,
    pub label: Option<String>,
    pub size: Option<i64>,
    /// `https://{sub}.{first domain without its first label}`
    pub base_url: String,
    pub path: Option<String>,
    pub res_id: Option<i64>,
}

impl SelectedSource {
    /// URL of one segment on the CDN
    pub fn segment_url(&self, token: &str) -> String {
        format!(
            "{}/sora/{}/{}",
            self.base_url,
            display_or_null(self.size.as_ref()),
            token
        )
    }

    /// Temp directory name used for resume state
    pub fn temp_dir_name(&self) -> String {
        format!(
            "temp_{}_{}",
            sanitize_path_component(&display_or_null(self.slug.as_ref())),
            sanitize_path_component(&display_or_null(self.label.as_ref()))
        )
    }
}

impl DecryptedMediaMetadata {
    /// Labels of all sources that have one
    pub fn labels(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter_map(|s| s.label.clone())
            .collect()
    }

    /// Pick the source whose label equals `resolution`
    ///
    /// # Errors
    /// - NoSourceSelected if no source carries that label
    /// - DecryptionFailed if the metadata has no domain or the source no subdomain
    pub fn select(&self, resolution: &str) -> Result<SelectedSource> {
        let source = self
            .sources
            .iter()
            .find(|s| s.label.as_deref() == Some(resolution))
            .ok_or_else(|| AbyssError::no_source(resolution, self.labels()))?;

        let domain = self.domains.first().ok_or_else(|| {
            AbyssError::DecryptionFailed("Decrypted metadata lists no domains".to_string())
        })?;
        let sub = source.sub.as_deref().ok_or_else(|| {
            AbyssError::DecryptionFailed(format!("Source '{}' has no subdomain", resolution))
        })?;

        Ok(SelectedSource {
            slug: self.slug.clone(),
            md5_id: self.md5_id,
            label: source.label.clone(),
            size: source.size,
            base_url: build_base_url(domain, sub),
            path: source.path.clone(),
            res_id: source.res_id,
        })
    }
}

/// `https://{sub}.{domain after its first '.'}`; a domain without a dot is used whole
pub fn build_base_url(domain: &str, sub: &str) -> String {
    let suffix = domain.split_once('.').map_or(domain, |(_, rest)| rest);
    format!("https://{}.{}", sub, suffix)
}

/// Render an optional value the way the CDN path expects (`null` when absent)
pub(crate) fn display_or_null<T: std::fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DecryptedMediaMetadata {
        DecryptedMediaMetadata {
            domains: vec!["www.abyss-cdn.net".to_string(), "cdn2.example.org".to_string()],
            sources: vec![
                Source {
                    label: Some("360p".to_string()),
                    sub: Some("s360".to_string()),
                    res_id: Some(1),
                    size: Some(1_000_000),
                    ..Default::default()
                },
                Source {
                    label: Some("720p".to_string()),
                    sub: Some("edge7".to_string()),
                    res_id: Some(7),
                    size: Some(5_242_880),
                    ..Default::default()
                },
            ],
            slug: Some("x".to_string()),
            md5_id: Some(2),
        }
    }

    #[test]
    fn test_select_builds_base_url() {
        let selected = sample().select("720p").unwrap();
        assert_eq!(selected.base_url, "https://edge7.abyss-cdn.net");
        assert_eq!(selected.size, Some(5_242_880));
        assert_eq!(selected.res_id, Some(7));
        assert_eq!(selected.md5_id, Some(2));
    }

    #[test]
    fn test_select_missing_resolution() {
        let err = sample().select("1080p").unwrap_err();
        match err {
            AbyssError::NoSourceSelected { resolution, available } => {
                assert_eq!(resolution, "1080p");
                assert_eq!(available, vec!["360p", "720p"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_select_without_domains() {
        let mut metadata = sample();
        metadata.domains.clear();
        assert!(matches!(
            metadata.select("720p"),
            Err(AbyssError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_base_url_without_dot_uses_domain() {
        assert_eq!(build_base_url("localhost", "a"), "https://a.localhost");
        assert_eq!(build_base_url("a.b.c", "s"), "https://s.b.c");
    }

    #[test]
    fn test_segment_counts() {
        assert_eq!(segment_count_for(5_242_880), 3);
        assert_eq!(segment_count_for(1_000_000), 1);
        assert_eq!(segment_count_for(2_097_152), 1);
        assert_eq!(segment_count_for(2_097_153), 2);
        assert_eq!(segment_count_for(0), 1);
        assert_eq!(segment_count_for(i64::MAX), 1usize << 42);
        assert_eq!(Source::default().segment_count(), 0);
    }

    #[test]
    fn test_segment_url_and_temp_dir() {
        let selected = sample().select("720p").unwrap();
        assert_eq!(
            selected.segment_url("TOKEN"),
            "https://edge7.abyss-cdn.net/sora/5242880/TOKEN"
        );
        assert_eq!(selected.temp_dir_name(), "temp_x_720p");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{"domains":["a.b"],"fristDatas":[{"x":1}],"sources":[{"label":"720p","partSize":3,"extra":true}]}"#;
        let metadata: DecryptedMediaMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.sources[0].part_size, Some(3));
        assert_eq!(metadata.slug, None);
    }
}
