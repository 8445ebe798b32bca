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


//! Media metadata
//!
//! Decoding of the page's encrypted envelope and the models it decrypts to.
//!
//! # Flow
//! 1. [`envelope::decode_envelope`] turns the base64 blob into
//!    [`DecryptedMediaMetadata`]
//! 2. [`DecryptedMediaMetadata::select`] picks a rendition by label and resolves
//!    its CDN base URL

pub mod envelope;
pub mod models;

// Re-export commonly used types
pub use envelope::{decode_envelope, MediaEnvelope};
pub use models::{DecryptedMediaMetadata, SelectedSource, Source};
