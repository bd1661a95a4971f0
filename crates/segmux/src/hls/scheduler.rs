// HLS Segment Scheduler: Downloads, decrypts and stores every segment of a media playlist.

use crate::DownloadError;
use crate::hls::config::{HlsConfig, SchedulingMode};
use crate::hls::decryption::Decryptor;
use crate::hls::fetcher::HttpFetch;
use crate::hls::playlist::Segment;
use futures::StreamExt;
use futures::stream::{self, FuturesUnordered};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// File name of segment `index` inside the workspace, e.g. `00042.ts`.
pub fn segment_file_name(index: usize, extension: &str) -> String {
    format!("{index:05}.{extension}")
}

/// One unit of work: where a segment comes from and where it goes.
#[derive(Debug, Clone)]
pub struct DownloadTask<'a> {
    pub segment: &'a Segment,
    pub destination: PathBuf,
}

/// Outcome of a scheduling run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Indices whose file was written to the workspace
    pub written: BTreeSet<usize>,
    /// Indices that failed, with the error that caused it
    pub failed: BTreeMap<usize, String>,
}

impl ScheduleReport {
    fn record(&mut self, index: usize, result: Result<(), DownloadError>) {
        match result {
            Ok(()) => {
                self.written.insert(index);
            }
            Err(e) => {
                self.failed.insert(index, e.to_string());
            }
        }
    }
}

pub struct SegmentScheduler {
    fetcher: Arc<dyn HttpFetch>,
    decryptor: Decryptor,
    mode: SchedulingMode,
    extension: String,
}

impl SegmentScheduler {
    pub fn new(
        fetcher: Arc<dyn HttpFetch>,
        decryptor: Decryptor,
        mode: SchedulingMode,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            decryptor,
            mode,
            extension: extension.into(),
        }
    }

    pub fn from_config(fetcher: Arc<dyn HttpFetch>, config: &HlsConfig) -> Self {
        Self::new(
            fetcher,
            Decryptor::new(config.decryption_offload),
            config.scheduling,
            config.segment_extension.clone(),
        )
    }

    /// Map each segment to its destination under `dir`, in playlist order.
    pub fn plan<'a>(&self, segments: &'a [Segment], dir: &Path) -> Vec<DownloadTask<'a>> {
        segments
            .iter()
            .map(|segment| DownloadTask {
                segment,
                destination: dir.join(segment_file_name(segment.index, &self.extension)),
            })
            .collect()
    }

    /// Download every segment into `dir` with at most `limit` fetches in flight.
    ///
    /// A failed segment is logged and left out of the workspace; it never
    /// aborts the run.
    pub async fn run(
        &self,
        segments: &[Segment],
        dir: &Path,
        limit: usize,
    ) -> Result<ScheduleReport, DownloadError> {
        if limit == 0 {
            return Err(DownloadError::configuration(
                "concurrency limit must be at least 1",
            ));
        }

        let started = Instant::now();
        let tasks = self.plan(segments, dir);
        info!(
            segments = tasks.len(),
            limit,
            mode = ?self.mode,
            "Starting segment downloads"
        );

        let report = match self.mode {
            SchedulingMode::BatchedBarrier => self.run_batched(tasks, limit).await,
            SchedulingMode::WorkerPool => self.run_pool(tasks, limit).await,
        };

        info!(
            written = report.written.len(),
            failed = report.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Segment downloads finished"
        );
        Ok(report)
    }

    async fn run_batched(&self, tasks: Vec<DownloadTask<'_>>, limit: usize) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        for (batch_number, batch) in tasks.chunks(limit).enumerate() {
            debug!(batch = batch_number, size = batch.len(), "Dispatching batch");
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|task| async move { (task.segment.index, self.process(task).await) })
                .collect();
            // Barrier: the next batch starts only after every worker here is done.
            while let Some((index, result)) = in_flight.next().await {
                report.record(index, result);
            }
        }
        report
    }

    async fn run_pool(&self, tasks: Vec<DownloadTask<'_>>, limit: usize) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        let mut results = stream::iter(tasks.iter())
            .map(|task| async move { (task.segment.index, self.process(task).await) })
            .buffer_unordered(limit);
        while let Some((index, result)) = results.next().await {
            report.record(index, result);
        }
        report
    }

    async fn process(&self, task: &DownloadTask<'_>) -> Result<(), DownloadError> {
        let index = task.segment.index;
        let result = self.fetch_decrypt_write(task).await;
        match &result {
            Ok(()) => debug!(index, path = %task.destination.display(), "Segment stored"),
            Err(e) => warn!(index, url = %task.segment.uri, error = %e, "Segment failed"),
        }
        result
    }

    async fn fetch_decrypt_write(&self, task: &DownloadTask<'_>) -> Result<(), DownloadError> {
        let data = self.fetcher.fetch(&task.segment.uri).await?;
        let data = self
            .decryptor
            .decrypt(data, task.segment.key.as_deref())
            .await?;

        // Written under a temporary name so a half-written file is never merged.
        let mut partial = task.destination.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        if let Err(e) = tokio::fs::write(&partial, &data).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        tokio::fs::rename(&partial, &task.destination).await?;
        Ok(())
    }
}
