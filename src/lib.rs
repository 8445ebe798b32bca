//! Segmented video downloader core
//!
//! Decrypts a hosting page's media envelope, derives per-segment access
//! tokens, fetches segments concurrently with resume support and merges them
//! into one MP4 file.

pub mod crypto;
pub mod download;
pub mod error;
pub mod file;
pub mod media;

pub use download::{
    DownloadConfig,
    ProgressPublisher,
    ProgressSnapshot,
    ProgressStatus,
    ReqwestTransport,
    SegmentTransport,
    VideoDownloader,
};
pub use error::{AbyssError, Result};
pub use media::{decode_envelope, DecryptedMediaMetadata, SelectedSource, Source};
