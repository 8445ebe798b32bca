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


//! Metadata envelope decoding
//!
//! The video page embeds a base64 blob. Decoded as Latin-1 it is a JSON
//! object:
//!
//! ```text
//! {"user_id": 1, "slug": "x", "md5_id": 2, "media": "<Latin-1 ciphertext>"}
//! ```
//!
//! # Decode Steps
//! 1. Base64 -> bytes -> Latin-1 string -> [`MediaEnvelope`]
//! 2. `key = md5_hex("{user_id}:{slug}:{md5_id}")` (text key)
//! 3. AES-CTR decrypt `media` with the key's UTF-8 bytes, parse `{"mp4": ...}`
//! 4. Overwrite `slug` and `md5_id` with the envelope's values
//!
//! Locating the blob inside the page is left to the caller.

use crate::crypto::cipher::{bytes_to_latin1, decrypt_to_utf8_string, derive_key, KeyInput};
use crate::error::{AbyssError, Result};
use crate::media::models::{DecryptedMediaMetadata, DecryptedPayload};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Standard alphabet, padding optional on decode
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Outer envelope embedded in the page
///
/// `user_id` and `md5_id` keep their JSON form so the key string is built from
/// exactly what the page sent (`1` and `"1"` both render as `1`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaEnvelope {
    #[serde(default)]
    pub user_id: Value,

    #[serde(default)]
    pub slug: Option<String>,

    #[serde(default)]
    pub md5_id: Value,

    /// Latin-1 carried ciphertext
    pub media: Option<String>,
}

impl MediaEnvelope {
    /// Base64-decode and parse the envelope
    pub fn parse(base64_envelope: &str) -> Result<Self> {
        let bytes = LENIENT_BASE64
            .decode(base64_envelope.trim())
            .map_err(|e| AbyssError::malformed(format!("Invalid base64: {}", e)))?;
        let text = bytes_to_latin1(&bytes);

        let envelope: MediaEnvelope = serde_json::from_str(&text)
            .map_err(|e| AbyssError::malformed(format!("Invalid envelope JSON: {}", e)))?;

        if envelope.media.is_none() {
            return Err(AbyssError::malformed("Envelope has no media field"));
        }

        Ok(envelope)
    }

    /// `user_id:slug:md5_id`, the text the decryption key is derived from
    pub fn key_source(&self) -> String {
        format!(
            "{}:{}:{}",
            scalar_to_string(&self.user_id),
            self.slug.as_deref().unwrap_or("null"),
            scalar_to_string(&self.md5_id)
        )
    }

    /// Numeric media id, when the envelope carries one
    pub fn md5_id_number(&self) -> Option<i64> {
        match &self.md5_id {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Decrypt the `media` payload
    pub fn decrypt(&self) -> Result<DecryptedMediaMetadata> {
        let media = self
            .media
            .as_deref()
            .ok_or_else(|| AbyssError::malformed("Envelope has no media field"))?;

        let key = derive_key(&KeyInput::Text(self.key_source()));
        let plaintext = decrypt_to_utf8_string(media, key.as_bytes())
            .map_err(|e| AbyssError::DecryptionFailed(e.to_string()))?;

        let payload: DecryptedPayload = serde_json::from_str(&plaintext)
            .map_err(|e| AbyssError::DecryptionFailed(format!("Invalid media JSON: {}", e)))?;

        let mut metadata = payload
            .mp4
            .ok_or_else(|| AbyssError::DecryptionFailed("Media payload has no mp4 object".to_string()))?;

        metadata.slug = self.slug.clone();
        metadata.md5_id = self.md5_id_number();

        debug!(
            slug = ?metadata.slug,
            sources = metadata.sources.len(),
            domains = metadata.domains.len(),
            "Decrypted media metadata"
        );

        Ok(metadata)
    }
}

/// Decode a base64 envelope into decrypted media metadata
///
/// # Errors
/// - MalformedEnvelope if the base64 or JSON is invalid, or `media` is missing
/// - DecryptionFailed if the payload does not decrypt to the expected JSON
pub fn decode_envelope(base64_envelope: &str) -> Result<DecryptedMediaMetadata> {
    MediaEnvelope::parse(base64_envelope)?.decrypt()
}

/// String form of a JSON scalar as it appears in string interpolation
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
