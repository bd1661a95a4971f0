// HLS Muxer: Joins the downloaded segment files into one output with a stream-copy concat.

use crate::DownloadError;
use crate::hls::config::HlsConfig;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const FILE_LIST_NAME: &str = "filelist.txt";

/// Lines of ffmpeg stderr kept in a merge error.
const STDERR_TAIL_LINES: usize = 8;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// External tool that concatenates the files named in a concat list.
#[async_trait]
pub trait ConcatTool: Send + Sync {
    async fn concat(&self, list_file: &Path, output: &Path) -> Result<(), DownloadError>;
}

/// Runs `ffmpeg -f concat -c copy`.
pub struct FfmpegConcat {
    binary: PathBuf,
    timeout: Duration,
}

impl FfmpegConcat {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn args<'a>(list_file: &'a Path, output: &'a Path) -> Vec<&'a OsStr> {
        let mut args: Vec<&OsStr> = [
            "-hide_banner",
            "-nostdin",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
        ]
        .into_iter()
        .map(OsStr::new)
        .collect();
        args.push(list_file.as_os_str());
        args.extend(["-c", "copy"].into_iter().map(OsStr::new));
        args.push(output.as_os_str());
        args
    }

    fn command(&self, list_file: &Path, output: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(Self::args(list_file, output))
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }
}

#[async_trait]
impl ConcatTool for FfmpegConcat {
    async fn concat(&self, list_file: &Path, output: &Path) -> Result<(), DownloadError> {
        let child = self.command(list_file, output).spawn().map_err(|e| {
            DownloadError::merge(format!(
                "failed to launch {}: {e}",
                self.binary.display()
            ))
        })?;

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                DownloadError::merge(format!("ffmpeg timed out after {:?}", self.timeout))
            })?
            .map_err(|e| DownloadError::merge(format!("failed to wait for ffmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(DownloadError::merge(format!(
                "ffmpeg failed with exit code {}: {}",
                result.status.code().unwrap_or(-1),
                stderr_tail(&stderr)
            )));
        }

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ffmpeg concat finished"
        );
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return "no output".to_string();
    }
    lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join(" | ")
}

/// Render a concat-demuxer list for `names`, one `file '<name>'` line each.
pub fn render_file_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|name| format!("file '{}'\n", name.as_ref().replace('\'', r"'\''")))
        .collect()
}

/// Inverse of [`render_file_list`].
pub fn parse_file_list(list: &str) -> Vec<String> {
    list.lines()
        .filter_map(|line| line.trim().strip_prefix("file "))
        .map(|rest| {
            let rest = rest.trim();
            let inner = rest
                .strip_prefix('\'')
                .and_then(|r| r.strip_suffix('\''))
                .unwrap_or(rest);
            inner.replace(r"'\''", "'")
        })
        .collect()
}

pub struct Muxer {
    tool: Arc<dyn ConcatTool>,
    extension: String,
}

impl Muxer {
    pub fn new(tool: Arc<dyn ConcatTool>, extension: impl Into<String>) -> Self {
        Self {
            tool,
            extension: extension.into(),
        }
    }

    pub fn from_config(config: &HlsConfig) -> Self {
        let tool = FfmpegConcat::new(config.ffmpeg_path.clone(), config.merge_timeout);
        Self::new(Arc::new(tool), config.segment_extension.clone())
    }

    /// Segment files in `dir`, in segment index order.
    ///
    /// Names are at least five digits wide, so `100000.ts` must still sort
    /// after `99999.ts`; the numeric stem decides, the name breaks ties.
    pub async fn collect_segment_files(&self, dir: &Path) -> Result<Vec<String>, DownloadError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(OsStr::to_str) == Some(self.extension.as_str())
                && let Some(name) = path.file_name().and_then(OsStr::to_str)
            {
                names.push(name.to_string());
            }
        }
        names.sort_by_cached_key(|name| {
            let index = name
                .split_once('.')
                .and_then(|(stem, _)| stem.parse::<usize>().ok());
            (index.is_none(), index, name.clone())
        });
        Ok(names)
    }

    /// Concatenate every segment file in `dir` into `output`.
    ///
    /// Returns the number of files merged. The list file is removed whether
    /// or not the tool succeeds.
    pub async fn merge(&self, dir: &Path, output: &Path) -> Result<usize, DownloadError> {
        let names = self.collect_segment_files(dir).await?;
        if names.is_empty() {
            return Err(DownloadError::merge(format!(
                "no segment files found in {}",
                dir.display()
            )));
        }

        let list_file = dir.join(FILE_LIST_NAME);
        tokio::fs::write(&list_file, render_file_list(&names)).await?;
        info!(files = names.len(), output = %output.display(), "Merging segments");

        let result = self.tool.concat(&list_file, output).await;

        if let Err(e) = tokio::fs::remove_file(&list_file).await {
            warn!(path = %list_file.display(), error = %e, "Failed to remove file list");
        }

        result.map(|()| names.len())
    }
}
