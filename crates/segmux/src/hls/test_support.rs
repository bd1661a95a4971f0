// In-memory stand-ins for the network and the concat tool, shared by unit tests.

use crate::DownloadError;
use crate::hls::fetcher::HttpFetch;
use crate::hls::muxer::{ConcatTool, parse_file_list};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

/// Serves fixed bodies by URL; unknown URLs fail as exhausted fetches.
#[derive(Default)]
pub struct MemoryFetcher {
    bodies: HashMap<String, Bytes>,
    failing: Vec<String>,
    delay: Option<Duration>,
    hits: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, url: &str, body: &str) -> Self {
        self.with_bytes(url, body.as_bytes().to_vec())
    }

    pub fn with_bytes(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), Bytes::from(body));
        self
    }

    /// Make `url` fail even if a body is registered.
    pub fn failing(mut self, url: &str) -> Self {
        self.failing.push(url.to_string());
        self
    }

    /// Hold every request for `delay` so concurrent requests overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpFetch for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, DownloadError> {
        *self
            .hits
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let key = url.to_string();
        match self.bodies.get(&key) {
            Some(body) if !self.failing.contains(&key) => Ok(body.clone()),
            _ => Err(DownloadError::FetchExhausted {
                url: key.clone(),
                attempts: 1,
                source: Box::new(DownloadError::http_status(StatusCode::NOT_FOUND, key.as_str())),
            }),
        }
    }
}

/// Concatenates the listed files byte for byte, like `-c copy` on raw TS.
#[derive(Default)]
pub struct CopyConcat {
    pub calls: AtomicUsize,
    pub listed: Mutex<Vec<String>>,
}

#[async_trait]
impl ConcatTool for CopyConcat {
    async fn concat(&self, list_file: &Path, output: &Path) -> Result<(), DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let dir = list_file.parent().unwrap_or(Path::new("."));
        let list = tokio::fs::read_to_string(list_file).await?;
        let names = parse_file_list(&list);

        let mut merged = Vec::new();
        for name in &names {
            merged.extend(tokio::fs::read(dir.join(name)).await?);
        }
        tokio::fs::write(output, merged).await?;
        *self.listed.lock().unwrap() = names;
        Ok(())
    }
}

/// Always fails, as if the external tool exited non-zero.
pub struct FailingConcat;

#[async_trait]
impl ConcatTool for FailingConcat {
    async fn concat(&self, _list_file: &Path, _output: &Path) -> Result<(), DownloadError> {
        Err(DownloadError::merge("concat tool exited with status 1"))
    }
}
