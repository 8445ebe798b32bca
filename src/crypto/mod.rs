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


//! Cryptography for the CDN's metadata and token protocol
//!
//! The hosting service protects two things with the same primitives:
//! - the `media` payload of the page envelope (text key `user_id:slug:md5_id`)
//! - per-segment request tokens (numeric key derived from the media size)
//!
//! Both use AES-CTR keyed by an MD5 hex digest. See [`cipher`] for the exact
//! byte layout.

pub mod cipher;

// Re-export commonly used types
pub use cipher::{
    bytes_to_latin1,
    decrypt_ctr,
    decrypt_to_utf8_string,
    derive_key,
    encrypt_ctr,
    latin1_to_bytes,
    KeyInput,
};
