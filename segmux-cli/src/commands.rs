use crate::batch::{job_target, parse_jobs};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use segmux_engine::{DownloadReport, HlsDownloader};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub struct CommandExecutor {
    config: AppConfig,
    downloader: HlsDownloader,
    json: bool,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, json: bool) -> Result<Self> {
        let downloader = HlsDownloader::new(config.hls_config()?)?;
        Ok(Self {
            config,
            downloader,
            json,
        })
    }

    pub async fn download(
        &self,
        url: &str,
        output_dir: Option<&Path>,
        name: Option<&str>,
        concurrency: Option<usize>,
    ) -> Result<()> {
        let dir = output_dir.unwrap_or(self.config.output_dir.as_path());
        let name = name.unwrap_or(self.config.output_name.as_str());
        let report = self
            .downloader
            .download_video(url, dir, name, self.concurrency(concurrency))
            .await?;
        self.print_report(&report)
    }

    pub async fn batch(
        &self,
        input: &Path,
        output_dir: Option<&Path>,
        concurrency: Option<usize>,
        skip_existing: bool,
        fingerprint_dirs: bool,
    ) -> Result<()> {
        let text = tokio::fs::read_to_string(input).await?;
        let jobs = parse_jobs(&text)?;
        let root: PathBuf = output_dir.unwrap_or(self.config.output_dir.as_path()).to_path_buf();
        let concurrency = self.concurrency(concurrency);
        info!("Loaded {} jobs from {}", jobs.len(), input.display());

        let mut failed = 0;
        for (i, job) in jobs.iter().enumerate() {
            let target = job_target(job, &root, &self.config.output_name, fingerprint_dirs);
            if skip_existing && tokio::fs::try_exists(target.output_path()).await? {
                info!(
                    "[{}/{}] Skipping {}, {} exists",
                    i + 1,
                    jobs.len(),
                    job.url,
                    target.output_path().display()
                );
                continue;
            }

            info!("[{}/{}] Downloading {}", i + 1, jobs.len(), job.url);
            match self
                .downloader
                .download_video(&job.url, &target.dir, &target.name, concurrency)
                .await
            {
                Ok(report) => self.print_report(&report)?,
                Err(e) => {
                    failed += 1;
                    error!("Job on line {} failed: {e}", job.line);
                    if self.json {
                        let line = serde_json::json!({
                            "status": "error",
                            "url": job.url,
                            "message": e.to_string(),
                        });
                        println!("{line}");
                    }
                }
            }
        }

        if failed > 0 {
            return Err(AppError::BatchFailed {
                failed,
                total: jobs.len(),
            });
        }
        Ok(())
    }

    fn concurrency(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.config.concurrency)
    }

    fn print_report(&self, report: &DownloadReport) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(report)?);
            return Ok(());
        }

        if report.is_complete() {
            println!(
                "{} ({} segments, {:.1}s)",
                report.output_path.display(),
                report.segments_written,
                report.elapsed_ms as f64 / 1000.0
            );
        } else {
            warn!(
                "{} is missing segments {:?}",
                report.output_path.display(),
                report.missing_segments
            );
            println!(
                "{} ({}/{} segments, {:.1}s)",
                report.output_path.display(),
                report.segments_written,
                report.segments_expected,
                report.elapsed_ms as f64 / 1000.0
            );
        }
        Ok(())
    }
}
