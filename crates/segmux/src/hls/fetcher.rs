// HLS Segment Fetcher: Performs one bounded-retry HTTP GET for manifests, keys and segments.

use crate::hls::config::HlsConfig;
use crate::hls::retry::{RetryAction, RetryPolicy, retry_with_backoff};
use crate::{DownloadError, create_client};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace};
use url::Url;

/// Anything that can turn a URL into bytes.
///
/// The resolver, parser and scheduler only talk to this trait so they can be
/// driven by an in-memory source in tests.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, DownloadError>;
}

pub struct SegmentFetcher {
    http_client: Client,
    retry: RetryPolicy,
    timeout: Duration,
}

impl SegmentFetcher {
    pub fn new(http_client: Client, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            http_client,
            retry,
            timeout,
        }
    }

    /// Build the HTTP client from `config.base` and use `config.retry`.
    pub fn from_config(config: &HlsConfig) -> Result<Self, DownloadError> {
        let client = create_client(&config.base)?;
        Ok(Self::new(client, config.retry.clone(), config.base.timeout))
    }

    async fn fetch_once(&self, url: &Url) -> RetryAction<Bytes> {
        let mut request = self.http_client.get(url.clone());
        if !self.timeout.is_zero() {
            request = request.timeout(self.timeout);
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return RetryAction::from_error(DownloadError::network(url.as_str(), e)),
        };

        let status = response.status();
        if !status.is_success() {
            return RetryAction::from_error(DownloadError::http_status(status, url.as_str()));
        }

        match response.bytes().await {
            Ok(bytes) => {
                trace!(
                    url = %url,
                    bytes = bytes.len(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Request completed"
                );
                RetryAction::Success(bytes)
            }
            Err(e) => RetryAction::from_error(DownloadError::network(url.as_str(), e)),
        }
    }
}

#[async_trait]
impl HttpFetch for SegmentFetcher {
    /// Returns the payload of the first successful attempt, or
    /// [`DownloadError::FetchExhausted`] once the attempt ceiling is hit.
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<Bytes, DownloadError> {
        let bytes =
            retry_with_backoff(&self.retry, url.as_str(), |_| self.fetch_once(url)).await?;
        debug!(size = bytes.len(), "Fetched");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DownloaderConfig;
    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn local_config() -> DownloaderConfig {
        DownloaderConfig {
            use_system_proxy: false,
            ..DownloaderConfig::default()
        }
    }

    fn fetcher(max_attempts: u32) -> SegmentFetcher {
        let client = create_client(&local_config()).unwrap();
        SegmentFetcher::new(
            client,
            RetryPolicy::fixed(max_attempts, Duration::from_millis(5)),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let base = serve(Router::new().route("/seg.ts", get(|| async { "payload" }))).await;
        let bytes = fetcher(3).fetch(&base.join("seg.ts").unwrap()).await.unwrap();
        assert_eq!(&bytes[..], b"payload");
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let hits = Arc::new(AtomicU32::new(0));
        let router = Router::new()
            .route(
                "/flaky.ts",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, "busy")
                    } else {
                        (StatusCode::OK, "finally")
                    }
                }),
            )
            .with_state(hits.clone());
        let base = serve(router).await;

        let bytes = fetcher(5).fetch(&base.join("flaky.ts").unwrap()).await.unwrap();
        assert_eq!(&bytes[..], b"finally");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_exhaustion_instead_of_empty_data() {
        let hits = Arc::new(AtomicU32::new(0));
        let router = Router::new()
            .route(
                "/down.ts",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::BAD_GATEWAY
                }),
            )
            .with_state(hits.clone());
        let base = serve(router).await;

        let err = fetcher(4)
            .fetch(&base.join("down.ts").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::FetchExhausted { attempts: 4, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let router = Router::new()
            .route(
                "/missing.ts",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NOT_FOUND
                }),
            )
            .with_state(hits.clone());
        let base = serve(router).await;

        let err = fetcher(10)
            .fetch(&base.join("missing.ts").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_refused_is_retried_then_exhausted() {
        // Bind and drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/seg.ts")).unwrap();
        let err = fetcher(2).fetch(&url).await.unwrap_err();
        assert!(matches!(err, DownloadError::FetchExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn sends_configured_headers() {
        let router = Router::new().route(
            "/echo",
            get(|headers: axum::http::HeaderMap| async move {
                headers
                    .get("x-segmux-test")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        );
        let base = serve(router).await;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-segmux-test", "hello".parse().unwrap());
        let config = HlsConfig::default()
            .with_base(local_config().with_headers(headers))
            .with_retry(RetryPolicy::fixed(1, Duration::from_millis(1)));
        let fetcher = SegmentFetcher::from_config(&config).unwrap();

        let bytes = fetcher.fetch(&base.join("echo").unwrap()).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }
}
