// HLS Downloader: Wires resolver, parser, scheduler and muxer into one download of one video.

use crate::DownloadError;
use crate::hls::config::HlsConfig;
use crate::hls::fetcher::{HttpFetch, SegmentFetcher};
use crate::hls::muxer::{ConcatTool, Muxer};
use crate::hls::playlist::{MediaPlaylist, PlaylistParser, PlaylistResolver};
use crate::hls::scheduler::{ScheduleReport, SegmentScheduler};
use crate::hls::workspace::TempWorkspace;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use url::Url;

/// Summary of one finished download.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DownloadReport {
    pub output_path: PathBuf,
    /// Media playlist the segments came from, after master resolution
    pub playlist_url: String,
    pub segments_expected: usize,
    pub segments_written: usize,
    /// Indices that could not be fetched and are absent from the output
    pub missing_segments: Vec<usize>,
    pub elapsed_ms: u64,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.missing_segments.is_empty()
    }
}

pub struct HlsDownloader {
    config: Arc<HlsConfig>,
    resolver: PlaylistResolver,
    parser: PlaylistParser,
    scheduler: SegmentScheduler,
    muxer: Muxer,
}

impl HlsDownloader {
    /// Downloader talking to the network through reqwest and merging with ffmpeg.
    pub fn new(config: HlsConfig) -> Result<Self, DownloadError> {
        let fetcher: Arc<dyn HttpFetch> = Arc::new(SegmentFetcher::from_config(&config)?);
        let muxer = Muxer::from_config(&config);
        Ok(Self::assemble(config, fetcher, muxer))
    }

    /// Downloader with caller-supplied transport and concat tool.
    pub fn with_components(
        config: HlsConfig,
        fetcher: Arc<dyn HttpFetch>,
        tool: Arc<dyn ConcatTool>,
    ) -> Self {
        let muxer = Muxer::new(tool, config.segment_extension.clone());
        Self::assemble(config, fetcher, muxer)
    }

    fn assemble(config: HlsConfig, fetcher: Arc<dyn HttpFetch>, muxer: Muxer) -> Self {
        Self {
            resolver: PlaylistResolver::from_config(Arc::clone(&fetcher), &config),
            parser: PlaylistParser::new(Arc::clone(&fetcher)),
            scheduler: SegmentScheduler::from_config(fetcher, &config),
            muxer,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HlsConfig {
        &self.config
    }

    /// Download the video behind `manifest_url` to `<output_dir>/<name>`.
    ///
    /// Segments are staged in `<output_dir>/temp_<name>`, which is removed
    /// before this returns whether or not the merge succeeded. Segments that
    /// fail every retry are skipped and listed in the report.
    #[instrument(skip(self, output_dir), fields(output_dir = %output_dir.display()))]
    pub async fn download_video(
        &self,
        manifest_url: &str,
        output_dir: &Path,
        name: &str,
        concurrency: usize,
    ) -> Result<DownloadReport, DownloadError> {
        let started = Instant::now();
        let url = Url::parse(manifest_url)
            .map_err(|e| DownloadError::invalid_url(manifest_url, e.to_string()))?;
        if name.trim().is_empty() {
            return Err(DownloadError::configuration("output name is empty"));
        }
        // The output and its workspace must land directly in `output_dir`.
        if name.contains(['/', '\\']) || Path::new(name).is_absolute() || matches!(name, "." | "..")
        {
            return Err(DownloadError::configuration(format!(
                "output name `{name}` must be a plain file name"
            )));
        }
        if concurrency == 0 {
            return Err(DownloadError::configuration(
                "concurrency limit must be at least 1",
            ));
        }

        let resolved = self.resolver.resolve_playlist(&url).await?;
        let playlist = self.parser.parse_text(&resolved.url, &resolved.body).await?;

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| DownloadError::workspace(output_dir, e))?;
        let output_path = output_dir.join(name);
        let workspace = TempWorkspace::create(output_dir, name).await?;

        let outcome = self
            .fetch_and_merge(&playlist, workspace.path(), &output_path, concurrency)
            .await;
        let cleanup = workspace.cleanup().await;

        let schedule = match (outcome, cleanup) {
            (Ok(schedule), Ok(())) => schedule,
            (Err(e), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    warn!(error = %cleanup_err, "Workspace cleanup failed after error");
                }
                return Err(e);
            }
            (Ok(_), Err(e)) => return Err(e),
        };

        let report = DownloadReport {
            output_path,
            playlist_url: playlist.url.to_string(),
            segments_expected: playlist.segments.len(),
            segments_written: schedule.written.len(),
            missing_segments: schedule.failed.keys().copied().collect(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if report.is_complete() {
            info!(
                output = %report.output_path.display(),
                segments = report.segments_written,
                elapsed_ms = report.elapsed_ms,
                "Download complete"
            );
        } else {
            warn!(
                output = %report.output_path.display(),
                missing = ?report.missing_segments,
                "Download finished with missing segments"
            );
        }
        Ok(report)
    }

    async fn fetch_and_merge(
        &self,
        playlist: &MediaPlaylist,
        workspace: &Path,
        output: &Path,
        concurrency: usize,
    ) -> Result<ScheduleReport, DownloadError> {
        let schedule = self
            .scheduler
            .run(&playlist.segments, workspace, concurrency)
            .await?;
        self.muxer.merge(workspace, output).await?;
        Ok(schedule)
    }
}
