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


//! Per-segment access tokens
//!
//! Every segment request carries an opaque token the CDN checks before
//! serving the byte range:
//!
//! ```text
//! key    = md5_hex(size)                       (numeric key)
//! path   = /mp4/{md5_id}/{res_id}/{size}/{FRAGMENT_SIZE}/{index}
//! cipher = aes_ctr(path, key)                  (Latin-1 string)
//! token  = b64(utf8(b64(latin1(cipher))))      (both layers without '=')
//! ```
//!
//! The CDN rejects padded or singly-encoded tokens.

use crate::crypto::cipher::{derive_key, encrypt_ctr, latin1_to_bytes, KeyInput};
use crate::download::FRAGMENT_SIZE;
use crate::error::Result;
use crate::media::models::{display_or_null, segment_count_for, SelectedSource};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use std::collections::BTreeMap;
use tracing::debug;

/// Ordered mapping of segment index to access token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentPlan {
    tokens: BTreeMap<usize, String>,
}

impl SegmentPlan {
    /// Generate tokens for every segment of the selected source
    ///
    /// Returns an empty plan when the source size is unknown.
    pub fn generate(source: &SelectedSource) -> Result<Self> {
        let size = match source.size {
            Some(size) => size,
            None => {
                debug!("Source size unknown, no segment tokens generated");
                return Ok(Self::default());
            }
        };

        let key = derive_key(&KeyInput::Numeric(size));
        let md5_id = display_or_null(source.md5_id.as_ref());
        let res_id = display_or_null(source.res_id.as_ref());

        let mut tokens = BTreeMap::new();
        for index in 0..segment_count_for(size) {
            let path = format!(
                "/mp4/{}/{}/{}/{}/{}",
                md5_id, res_id, size, FRAGMENT_SIZE, index
            );
            let cipher = encrypt_ctr(&path, &key)?;
            tokens.insert(index, double_encode_base64(&cipher)?);
        }

        debug!(count = tokens.len(), "Generated segment request tokens");
        Ok(Self { tokens })
    }

    /// Number of segments in the plan
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Token for one segment
    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get(&index).map(String::as_str)
    }

    /// All segment indices in ascending order
    pub fn indices(&self) -> Vec<usize> {
        self.tokens.keys().copied().collect()
    }

    /// Iterate `(index, token)` in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.tokens.iter().map(|(i, t)| (*i, t.as_str()))
    }
}

/// Base64 the Latin-1 bytes, then base64 the resulting ASCII; no padding on either layer
pub fn double_encode_base64(cipher_text: &str) -> Result<String> {
    let inner = STANDARD_NO_PAD.encode(latin1_to_bytes(cipher_text)?);
    Ok(STANDARD_NO_PAD.encode(inner.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::bytes_to_latin1;

    fn source(size: Option<i64>) -> SelectedSource {
        SelectedSource {
            slug: Some("x".to_string()),
            md5_id: Some(2),
            label: Some("720p".to_string()),
            size,
            base_url: "https://edge7.abyss-cdn.net".to_string(),
            path: None,
            res_id: Some(7),
        }
    }

    #[test]
    fn test_known_tokens() {
        let plan = SegmentPlan::generate(&source(Some(5_242_880))).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan.token(0),
            Some("cHJjZytIQjl1dDdzOS82dklEUENiZmR6UnFNaThNaDNZdEE")
        );
        assert_eq!(
            plan.token(1),
            Some("cHJjZytIQjl1dDdzOS82dklEUENiZmR6UnFNaThNaDNZdEU")
        );
        assert_eq!(
            plan.token(2),
            Some("cHJjZytIQjl1dDdzOS82dklEUENiZmR6UnFNaThNaDNZdEk")
        );
    }

    #[test]
    fn test_single_segment_for_small_source() {
        let plan = SegmentPlan::generate(&source(Some(1_000_000))).unwrap();
        assert_eq!(plan.indices(), vec![0]);
    }

    #[test]
    fn test_unknown_size_gives_empty_plan() {
        let plan = SegmentPlan::generate(&source(None)).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_double_encoding_is_reversible_and_unpadded() {
        let key = derive_key(&KeyInput::Numeric(123_456_789));
        for len in 1..12 {
            let cipher = encrypt_ctr(&"p".repeat(len), &key).unwrap();
            let token = double_encode_base64(&cipher).unwrap();
            assert!(!token.contains('='));

            let inner = STANDARD_NO_PAD.decode(&token).unwrap();
            let inner = String::from_utf8(inner).unwrap();
            assert!(!inner.contains('='));

            let raw = STANDARD_NO_PAD.decode(&inner).unwrap();
            assert_eq!(bytes_to_latin1(&raw), cipher);
        }
    }
}
