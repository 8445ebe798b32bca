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


//! HTTP seam for segment requests
//!
//! The fetcher only needs "GET this URL with these headers and give me the
//! status plus a byte stream". [`SegmentTransport`] captures that so callers
//! can plug in a different client (for example one that imitates a browser's
//! TLS fingerprint) and tests can serve segments from memory.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Body of a segment response, yielded chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Response to one segment request
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,

    /// Response body
    pub body: ByteStream,
}

impl TransportResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Issues segment GET requests
#[async_trait]
pub trait SegmentTransport: Send + Sync {
    /// GET `url` with the given headers
    ///
    /// Non-2xx statuses are returned as a response, not an error.
    async fn fetch(&self, url: &str, headers: &HashMap<String, String>) -> Result<TransportResponse>;
}

/// [`SegmentTransport`] backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Client with connection pooling and a connect timeout only
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => warn!(header = %name, "Skipping invalid request header"),
            }
        }
        map
    }
}

#[async_trait]
impl SegmentTransport for ReqwestTransport {
    async fn fetch(&self, url: &str, headers: &HashMap<String, String>) -> Result<TransportResponse> {
        let response = self
            .client
            .get(url)
            .headers(Self::header_map(headers))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body: ByteStream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Into::into))
            .boxed();

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_headers_are_skipped() {
        let mut headers = HashMap::new();
        headers.insert("Referer".to_string(), "https://abysscdn.com/".to_string());
        headers.insert("Bad Header".to_string(), "x".to_string());

        let map = ReqwestTransport::header_map(&headers);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("referer").unwrap(), "https://abysscdn.com/");
    }

    #[test]
    fn test_success_range() {
        let ok = TransportResponse {
            status: 206,
            body: futures_util::stream::empty().boxed(),
        };
        let forbidden = TransportResponse {
            status: 403,
            body: futures_util::stream::empty().boxed(),
        };
        assert!(ok.is_success());
        assert!(!forbidden.is_success());
    }
}
