use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DownloaderConfig;
use crate::hls::retry::RetryPolicy;

/// Tie-break rule used when a master playlist lists several variant playlists.
///
/// Only one variant is ever downloaded. No bandwidth or resolution
/// comparison is performed; the choice is purely positional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum VariantSelection {
    /// The first variant line in the master playlist wins.
    #[default]
    #[serde(rename = "first")]
    #[cfg_attr(feature = "clap", value(name = "first"))]
    FirstListed,
    /// The last variant line in the master playlist wins.
    #[serde(rename = "last")]
    #[cfg_attr(feature = "clap", value(name = "last"))]
    LastListed,
}

impl VariantSelection {
    pub fn pick<'a, I>(self, mut candidates: I) -> Option<&'a str>
    where
        I: Iterator<Item = &'a str>,
    {
        match self {
            Self::FirstListed => candidates.next(),
            Self::LastListed => candidates.last(),
        }
    }
}

/// How segment work is dispatched across workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum SchedulingMode {
    /// Launch `limit` workers, wait for all of them, then launch the next group.
    #[default]
    #[serde(rename = "batched")]
    #[cfg_attr(feature = "clap", value(name = "batched"))]
    BatchedBarrier,
    /// Keep `limit` workers busy, starting the next segment as soon as one finishes.
    #[serde(rename = "pool")]
    #[cfg_attr(feature = "clap", value(name = "pool"))]
    WorkerPool,
}

#[derive(Debug, Clone)]
pub struct HlsConfig {
    /// HTTP client settings
    pub base: DownloaderConfig,
    /// Retry policy applied to every manifest, key and segment request
    pub retry: RetryPolicy,
    pub variant_selection: VariantSelection,
    pub scheduling: SchedulingMode,
    /// Concurrency used by callers that don't pass their own limit
    pub default_concurrency: usize,
    /// Extension given to segment files in the workspace
    pub segment_extension: String,
    /// Maximum number of master playlists followed before giving up
    pub max_playlist_depth: usize,
    /// Path to the ffmpeg binary
    pub ffmpeg_path: PathBuf,
    pub merge_timeout: Duration,
    /// Run AES decryption on the blocking thread pool
    pub decryption_offload: bool,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            base: DownloaderConfig::default(),
            retry: RetryPolicy::default(),
            variant_selection: VariantSelection::default(),
            scheduling: SchedulingMode::default(),
            default_concurrency: 10,
            segment_extension: "ts".to_string(),
            max_playlist_depth: 4,
            ffmpeg_path: std::env::var_os("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            merge_timeout: Duration::from_secs(60 * 60),
            decryption_offload: true,
        }
    }
}

impl HlsConfig {
    pub fn with_base(mut self, base: DownloaderConfig) -> Self {
        self.base = base;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_variant_selection(mut self, selection: VariantSelection) -> Self {
        self.variant_selection = selection;
        self
    }

    pub fn with_scheduling(mut self, scheduling: SchedulingMode) -> Self {
        self.scheduling = scheduling;
        self
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn with_segment_extension(mut self, extension: impl Into<String>) -> Self {
        self.segment_extension = extension.into();
        self
    }
}
