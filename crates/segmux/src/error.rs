use std::path::PathBuf;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request for {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("giving up on {url} after {attempts} attempts: {source}")]
    FetchExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: Box<DownloadError>,
    },

    #[error("failed to fetch manifest {url}: {source}")]
    ManifestFetch {
        url: String,
        #[source]
        source: Box<DownloadError>,
    },

    #[error("malformed manifest {url}: {reason}")]
    ManifestParse { url: String, reason: String },

    #[error("failed to fetch key {uri}: {source}")]
    KeyFetch {
        uri: String,
        #[source]
        source: Box<DownloadError>,
    },

    #[error("invalid key from {uri}: {reason}")]
    InvalidKey { uri: String, reason: String },

    #[error("unsupported encryption method `{method}`")]
    UnsupportedEncryption { method: String },

    #[error("decryption error: {reason}")]
    Decryption { reason: String },

    #[error("merge failed: {reason}")]
    Merge { reason: String },

    #[error("workspace error at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn manifest_fetch(url: impl Into<String>, source: DownloadError) -> Self {
        Self::ManifestFetch {
            url: url.into(),
            source: Box::new(source),
        }
    }

    pub fn manifest_parse(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestParse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn key_fetch(uri: impl Into<String>, source: DownloadError) -> Self {
        Self::KeyFetch {
            uri: uri.into(),
            source: Box::new(source),
        }
    }

    pub fn merge(reason: impl Into<String>) -> Self {
        Self::Merge {
            reason: reason.into(),
        }
    }

    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether a single HTTP attempt that failed with this error may be repeated.
    ///
    /// Transport failures and server-side statuses (5xx, 408, 429) are
    /// transient; everything else is a protocol or logic failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { source, .. } => {
                source.is_connect()
                    || source.is_timeout()
                    || source.is_request()
                    || source.is_body()
                    || source.is_decode()
            }
            Self::HttpStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Io { .. } => true,
            Self::InvalidUrl { .. }
            | Self::FetchExhausted { .. }
            | Self::ManifestFetch { .. }
            | Self::ManifestParse { .. }
            | Self::KeyFetch { .. }
            | Self::InvalidKey { .. }
            | Self::UnsupportedEncryption { .. }
            | Self::Decryption { .. }
            | Self::Merge { .. }
            | Self::Workspace { .. }
            | Self::Configuration { .. } => false,
        }
    }

    /// Whether this failure came from running out of retry attempts, at any nesting level.
    pub fn is_exhausted(&self) -> bool {
        match self {
            Self::FetchExhausted { .. } => true,
            Self::ManifestFetch { source, .. } | Self::KeyFetch { source, .. } => {
                source.is_exhausted()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = DownloadError::http_status(StatusCode::BAD_GATEWAY, "http://a/seg.ts");
        assert!(err.is_retryable());
        let err = DownloadError::http_status(StatusCode::TOO_MANY_REQUESTS, "http://a/seg.ts");
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_fatal() {
        let err = DownloadError::http_status(StatusCode::NOT_FOUND, "http://a/seg.ts");
        assert!(!err.is_retryable());
        assert!(!DownloadError::merge("ffmpeg exited with 1").is_retryable());
    }

    #[test]
    fn exhaustion_is_visible_through_wrappers() {
        let inner = DownloadError::FetchExhausted {
            url: "http://a/index.m3u8".to_string(),
            attempts: 3,
            source: Box::new(DownloadError::http_status(
                StatusCode::SERVICE_UNAVAILABLE,
                "http://a/index.m3u8",
            )),
        };
        let err = DownloadError::manifest_fetch("http://a/index.m3u8", inner);
        assert!(err.is_exhausted());
        assert!(err.to_string().contains("3 attempts"));
    }
}
