//! Downloader for segmented (HLS) video streams.
//!
//! [`HlsDownloader::download_video`] resolves a manifest URL to a media
//! playlist, fetches and decrypts its segments with bounded concurrency and
//! per-request retries, then concatenates them into a single file with
//! ffmpeg.

pub mod config;
pub mod error;
pub mod hls;

pub use config::{
    DEFAULT_USER_AGENT, DownloaderConfig, ProxyConfig, create_client, install_rustls_provider,
};
pub use error::DownloadError;
pub use hls::{DownloadReport, HlsConfig, HlsDownloader};
