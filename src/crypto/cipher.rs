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


//! AES-CTR primitives and key derivation for the CDN's token protocol
//!
//! # Key Derivation
//! Keys are the lowercase hex MD5 digest of a byte sequence whose
//! construction depends on the kind of input:
//! - **Numeric** (segment tokens, keyed by the media size): every character of
//!   the decimal form is mapped on its own. Digits become their value
//!   (`'5'` -> `0x05`), anything else (a minus sign) becomes its character code.
//! - **Text** (envelope decryption, keyed by `user_id:slug:md5_id`): plain
//!   UTF-8 bytes.
//!
//! Mixing the two up produces a valid-looking key the CDN silently rejects.
//!
//! # Cipher
//! - AES in CTR mode with a 128-bit big-endian counter, no padding
//! - Key bytes: the UTF-8 bytes of the hex key (32 bytes -> AES-256)
//! - IV: the first 16 bytes of those same key bytes
//!
//! # Binary-as-text
//! Ciphertext travels as a Latin-1 string: each byte is the code point
//! U+0000..=U+00FF of one char. [`latin1_to_bytes`] and [`bytes_to_latin1`]
//! are exact inverses.

use crate::error::{AbyssError, Result};
use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use md5::{Digest, Md5};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// IV length taken from the front of the key material
const IV_LEN: usize = 16;

/// Input to [`derive_key`]
///
/// The two variants build different byte sequences from the same-looking
/// value, see the module docs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    /// Number rendered in decimal, digits mapped to their value
    Numeric(i64),
    /// Arbitrary text, UTF-8 encoded
    Text(String),
}

impl KeyInput {
    /// Byte sequence fed into MD5
    pub fn to_key_bytes(&self) -> Vec<u8> {
        match self {
            KeyInput::Numeric(value) => value
                .to_string()
                .chars()
                .map(|c| match c.to_digit(10) {
                    Some(digit) => digit as u8,
                    None => c as u8,
                })
                .collect(),
            KeyInput::Text(text) => text.as_bytes().to_vec(),
        }
    }
}

impl From<i64> for KeyInput {
    fn from(value: i64) -> Self {
        KeyInput::Numeric(value)
    }
}

impl From<&str> for KeyInput {
    fn from(value: &str) -> Self {
        KeyInput::Text(value.to_string())
    }
}

impl From<String> for KeyInput {
    fn from(value: String) -> Self {
        KeyInput::Text(value)
    }
}

/// Derive a key: lowercase hex MD5 of the input's byte sequence
///
/// # Example
/// ```
/// use abyss_core::crypto::cipher::{derive_key, KeyInput};
///
/// let key = derive_key(&KeyInput::Numeric(5242880));
/// assert_eq!(key, "8090b43ff30cb15dd49462de917730da");
/// ```
pub fn derive_key(input: &KeyInput) -> String {
    let digest = Md5::digest(input.to_key_bytes());
    hex::encode(digest)
}

/// Run the CTR keystream over `data` in place
///
/// Encryption and decryption are the same operation in CTR mode.
fn apply_ctr(key_bytes: &[u8], data: &mut [u8]) -> Result<()> {
    if key_bytes.len() < IV_LEN {
        return Err(AbyssError::crypto(format!(
            "Key material too short for IV: {} bytes",
            key_bytes.len()
        )));
    }
    let iv = &key_bytes[..IV_LEN];
    let invalid = |e: ctr::cipher::InvalidLength| AbyssError::crypto(e.to_string());

    match key_bytes.len() {
        16 => Aes128Ctr::new_from_slices(key_bytes, iv)
            .map_err(invalid)?
            .apply_keystream(data),
        24 => Aes192Ctr::new_from_slices(key_bytes, iv)
            .map_err(invalid)?
            .apply_keystream(data),
        32 => Aes256Ctr::new_from_slices(key_bytes, iv)
            .map_err(invalid)?
            .apply_keystream(data),
        n => {
            return Err(AbyssError::crypto(format!(
                "Invalid AES key length: {} bytes",
                n
            )))
        }
    }

    Ok(())
}

/// Encrypt UTF-8 text, returning the ciphertext as a Latin-1 string
pub fn encrypt_ctr(plaintext: &str, key: &str) -> Result<String> {
    let mut buffer = plaintext.as_bytes().to_vec();
    apply_ctr(key.as_bytes(), &mut buffer)?;
    Ok(bytes_to_latin1(&buffer))
}

/// Decrypt raw ciphertext bytes with a hex-string key
pub fn decrypt_ctr(ciphertext: &[u8], key: &str) -> Result<Vec<u8>> {
    let mut buffer = ciphertext.to_vec();
    apply_ctr(key.as_bytes(), &mut buffer)?;
    Ok(buffer)
}

/// Decrypt a Latin-1 carried ciphertext and decode the plaintext as UTF-8
///
/// `key_bytes` is used both as AES key and (first 16 bytes) as IV.
pub fn decrypt_to_utf8_string(cipher_text: &str, key_bytes: &[u8]) -> Result<String> {
    let mut buffer = latin1_to_bytes(cipher_text)?;
    apply_ctr(key_bytes, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| AbyssError::crypto(format!("Decrypted payload is not UTF-8: {}", e)))
}

/// Map each byte to the char with the same code point
pub fn bytes_to_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Inverse of [`bytes_to_latin1`]; fails on chars above U+00FF
pub fn latin1_to_bytes(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(c).map_err(|_| {
                AbyssError::crypto(format!("Character U+{:04X} is not a Latin-1 byte", c as u32))
            })
        })
        .collect()
}
