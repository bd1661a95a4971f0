// HLS download pipeline: resolve, parse, fetch, decrypt, store, merge.

pub mod config;
mod decryption;
mod downloader;
mod fetcher;
mod muxer;
mod playlist;
pub mod retry;
mod scheduler;
mod workspace;

#[cfg(test)]
mod test_support;

pub use config::{HlsConfig, SchedulingMode, VariantSelection};
pub use decryption::Decryptor;
pub use downloader::{DownloadReport, HlsDownloader};
pub use fetcher::{HttpFetch, SegmentFetcher};
pub use muxer::{ConcatTool, FILE_LIST_NAME, FfmpegConcat, Muxer, parse_file_list, render_file_list};
pub use playlist::{
    EncryptionKey, EncryptionMethod, MediaPlaylist, PlaylistParser, PlaylistResolver,
    ResolvedPlaylist, Segment, is_master_playlist, playlist_base_url, variant_references,
};
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{DownloadTask, ScheduleReport, SegmentScheduler, segment_file_name};
pub use workspace::TempWorkspace;
