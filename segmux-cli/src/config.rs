use crate::cli::Args;
use crate::error::{AppError, Result};
use crate::utils::{build_header_map, parse_params};
use segmux_engine::hls::{RetryPolicy, SchedulingMode, VariantSelection};
use segmux_engine::{DEFAULT_USER_AGENT, DownloaderConfig, HlsConfig, ProxyConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Settings read from `config.toml`. Every field is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub output_dir: PathBuf,
    /// File name used when a job doesn't name its output
    pub output_name: String,
    pub concurrency: usize,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub ffmpeg_path: Option<PathBuf>,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
    pub variant: VariantSelection,
    pub scheduler: SchedulingMode,
    pub headers: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let engine = HlsConfig::default();
        Self {
            output_dir: PathBuf::from("downloads"),
            output_name: "1.mp4".to_string(),
            concurrency: engine.default_concurrency,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            ffmpeg_path: None,
            retries: engine.retry.max_attempts,
            retry_delay_ms: engine.retry.delay.as_millis() as u64,
            timeout_secs: engine.base.timeout.as_secs(),
            variant: engine.variant_selection,
            scheduler: engine.scheduling,
            headers: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("segmux").join("config.toml"))
    }

    /// Load `path`, or the default location when `path` is `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&text)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply command-line options on top of the file settings.
    pub fn apply_args(&mut self, args: &Args) -> Result<()> {
        for (key, value) in parse_params(&args.headers)? {
            self.headers.insert(key, value);
        }
        if let Some(user_agent) = &args.user_agent {
            self.user_agent = user_agent.clone();
        }
        if let Some(proxy) = &args.proxy {
            self.proxy = Some(proxy.clone());
        }
        if let Some(ffmpeg) = &args.ffmpeg {
            self.ffmpeg_path = Some(ffmpeg.clone());
        }
        if let Some(retries) = args.retries {
            self.retries = retries;
        }
        if let Some(delay) = args.retry_delay_ms {
            self.retry_delay_ms = delay;
        }
        if let Some(timeout) = args.timeout {
            self.timeout_secs = timeout;
        }
        if let Some(variant) = args.variant {
            self.variant = variant;
        }
        if let Some(scheduler) = args.scheduler {
            self.scheduler = scheduler;
        }
        Ok(())
    }

    /// Engine configuration for these settings.
    pub fn hls_config(&self) -> Result<HlsConfig> {
        if self.retries == 0 {
            return Err(AppError::Config("retries must be at least 1".to_string()));
        }

        let headers = build_header_map(
            self.headers
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        )?;
        let mut base = DownloaderConfig::default()
            .with_user_agent(self.user_agent.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_headers(headers);
        if let Some(proxy) = &self.proxy {
            base = base.with_proxy(ProxyConfig::new(proxy.clone()));
        }

        let mut config = HlsConfig::default()
            .with_base(base)
            .with_retry(RetryPolicy::fixed(
                self.retries,
                Duration::from_millis(self.retry_delay_ms),
            ))
            .with_variant_selection(self.variant)
            .with_scheduling(self.scheduler);
        config.default_concurrency = self.concurrency;
        if let Some(ffmpeg) = &self.ffmpeg_path {
            config = config.with_ffmpeg_path(ffmpeg.clone());
        }
        Ok(config)
    }
}
