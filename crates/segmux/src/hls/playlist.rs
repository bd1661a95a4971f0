// HLS Playlist Engine: Resolves master playlists and parses media playlists into segments.

use crate::DownloadError;
use crate::hls::config::{HlsConfig, VariantSelection};
use crate::hls::fetcher::HttpFetch;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, trace, warn};
use url::Url;

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";
const KEY_TAG: &str = "#EXT-X-KEY";
const SEGMENT_TAG: &str = "#EXTINF";
const PLAYLIST_EXTENSION: &str = ".m3u8";

static METHOD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"METHOD=([^,\s]+)").unwrap());
static URI_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"URI="([^"]+)""#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    None,
    Aes128,
}

impl EncryptionMethod {
    fn from_attribute(value: &str) -> Result<Self, DownloadError> {
        match value.trim_matches('"') {
            "NONE" => Ok(Self::None),
            "AES-128" => Ok(Self::Aes128),
            other => Err(DownloadError::UnsupportedEncryption {
                method: other.to_string(),
            }),
        }
    }
}

/// Key material for a run of segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    pub method: EncryptionMethod,
    pub key: [u8; 16],
    /// Where the key bytes came from; only used for diagnostics.
    pub uri: Option<Url>,
}

impl EncryptionKey {
    pub fn aes128(key: [u8; 16]) -> Self {
        Self {
            method: EncryptionMethod::Aes128,
            key,
            uri: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// 0-based position in the media playlist; decides the output file name.
    pub index: usize,
    pub uri: Url,
    /// Key active when the segment was listed.
    pub key: Option<Arc<EncryptionKey>>,
}

#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    pub url: Url,
    pub segments: Vec<Segment>,
    /// Key state after the last line of the playlist.
    pub final_key: Option<Arc<EncryptionKey>>,
}

/// A concrete media playlist location plus the body fetched while resolving it.
#[derive(Debug, Clone)]
pub struct ResolvedPlaylist {
    pub url: Url,
    pub body: String,
}

pub fn is_master_playlist(body: &str) -> bool {
    body.contains(STREAM_INF_TAG)
}

/// Plain (non-tag) lines that point at another playlist, in listing order.
pub fn variant_references(body: &str) -> impl Iterator<Item = &str> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.contains(PLAYLIST_EXTENSION))
}

/// Base URL for relative references: the playlist URL without its last path component.
pub fn playlist_base_url(playlist_url: &Url) -> Result<Url, DownloadError> {
    playlist_url.join(".").map_err(|e| {
        DownloadError::manifest_parse(
            playlist_url.as_str(),
            format!("failed to determine base URL: {e}"),
        )
    })
}

pub struct PlaylistResolver {
    fetcher: Arc<dyn HttpFetch>,
    selection: VariantSelection,
    max_depth: usize,
}

impl PlaylistResolver {
    pub fn new(fetcher: Arc<dyn HttpFetch>, selection: VariantSelection, max_depth: usize) -> Self {
        Self {
            fetcher,
            selection,
            max_depth,
        }
    }

    pub fn from_config(fetcher: Arc<dyn HttpFetch>, config: &HlsConfig) -> Self {
        Self::new(fetcher, config.variant_selection, config.max_playlist_depth)
    }

    /// URL of the media playlist that `initial_url` leads to.
    pub async fn resolve(&self, initial_url: &Url) -> Result<Url, DownloadError> {
        Ok(self.resolve_playlist(initial_url).await?.url)
    }

    /// Follow master playlists until a media playlist is reached.
    ///
    /// Exactly one variant is chosen per master, using the configured
    /// [`VariantSelection`]. The returned body belongs to the final URL.
    pub async fn resolve_playlist(
        &self,
        initial_url: &Url,
    ) -> Result<ResolvedPlaylist, DownloadError> {
        let mut current = initial_url.clone();

        for depth in 0..=self.max_depth {
            let body = fetch_text(self.fetcher.as_ref(), &current).await?;
            if !is_master_playlist(&body) {
                if depth > 0 {
                    info!(url = %current, "Resolved media playlist");
                }
                return Ok(ResolvedPlaylist { url: current, body });
            }

            let reference = self
                .selection
                .pick(variant_references(&body))
                .ok_or_else(|| {
                    DownloadError::manifest_parse(
                        current.as_str(),
                        "master playlist lists no variant playlists",
                    )
                })?;
            let next = current.join(reference).map_err(|e| {
                DownloadError::manifest_parse(
                    current.as_str(),
                    format!("bad variant reference `{reference}`: {e}"),
                )
            })?;
            debug!(
                master = %current,
                variant = %next,
                selection = ?self.selection,
                "Selected variant playlist"
            );
            current = next;
        }

        Err(DownloadError::manifest_parse(
            initial_url.as_str(),
            format!("master playlists nested deeper than {}", self.max_depth),
        ))
    }
}

pub struct PlaylistParser {
    fetcher: Arc<dyn HttpFetch>,
}

impl PlaylistParser {
    pub fn new(fetcher: Arc<dyn HttpFetch>) -> Self {
        Self { fetcher }
    }

    /// Fetch and parse a media playlist.
    pub async fn parse(&self, playlist_url: &Url) -> Result<MediaPlaylist, DownloadError> {
        let body = fetch_text(self.fetcher.as_ref(), playlist_url).await?;
        self.parse_text(playlist_url, &body).await
    }

    /// Parse an already-fetched media playlist body.
    ///
    /// Key lines fetch their key material as they are met, so each segment
    /// carries the key that was active at its position. A playlist with no
    /// segments is not an error.
    pub async fn parse_text(
        &self,
        playlist_url: &Url,
        body: &str,
    ) -> Result<MediaPlaylist, DownloadError> {
        let base_url = playlist_base_url(playlist_url)?;
        let mut keys: HashMap<Url, [u8; 16]> = HashMap::new();
        let mut active_key: Option<Arc<EncryptionKey>> = None;
        let mut segments = Vec::new();
        let mut expecting_uri = false;

        for line in body.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }

            if line.starts_with(KEY_TAG) {
                active_key = self.read_key(line, &base_url, &mut keys).await?;
                continue;
            }

            if line.starts_with(SEGMENT_TAG) {
                if expecting_uri {
                    warn!(playlist = %playlist_url, "Segment info without URI, ignoring");
                }
                expecting_uri = true;
                continue;
            }

            if line.starts_with('#') || !expecting_uri {
                continue;
            }

            expecting_uri = false;
            let uri = base_url.join(line).map_err(|e| {
                DownloadError::manifest_parse(
                    playlist_url.as_str(),
                    format!("bad segment URI `{line}`: {e}"),
                )
            })?;
            trace!(index = segments.len(), uri = %uri, "Segment");
            segments.push(Segment {
                index: segments.len(),
                uri,
                key: active_key.clone(),
            });
        }

        info!(
            playlist = %playlist_url,
            segments = segments.len(),
            encrypted = segments.iter().filter(|s| s.key.is_some()).count(),
            "Parsed media playlist"
        );

        Ok(MediaPlaylist {
            url: playlist_url.clone(),
            segments,
            final_key: active_key,
        })
    }

    async fn read_key(
        &self,
        line: &str,
        base_url: &Url,
        keys: &mut HashMap<Url, [u8; 16]>,
    ) -> Result<Option<Arc<EncryptionKey>>, DownloadError> {
        let method = METHOD_REGEX
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| {
                DownloadError::manifest_parse(base_url.as_str(), format!("key without METHOD: {line}"))
            })?;

        match EncryptionMethod::from_attribute(method)? {
            EncryptionMethod::None => Ok(None),
            EncryptionMethod::Aes128 => {
                let uri = URI_REGEX
                    .captures(line)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str())
                    .ok_or_else(|| {
                        DownloadError::manifest_parse(
                            base_url.as_str(),
                            format!("AES-128 key without URI: {line}"),
                        )
                    })?;
                let key_url = base_url
                    .join(uri)
                    .map_err(|e| DownloadError::invalid_url(uri, e.to_string()))?;
                if line.contains(",IV=") {
                    warn!(key = %key_url, "Explicit IV ignored, the key doubles as IV");
                }

                let key = match keys.get(&key_url) {
                    Some(key) => *key,
                    None => {
                        let key = self.fetch_key(&key_url).await?;
                        keys.insert(key_url.clone(), key);
                        key
                    }
                };

                Ok(Some(Arc::new(EncryptionKey {
                    method: EncryptionMethod::Aes128,
                    key,
                    uri: Some(key_url),
                })))
            }
        }
    }

    async fn fetch_key(&self, key_url: &Url) -> Result<[u8; 16], DownloadError> {
        let bytes = self
            .fetcher
            .fetch(key_url)
            .await
            .map_err(|e| DownloadError::key_fetch(key_url.as_str(), e))?;
        let key: [u8; 16] = bytes.as_ref().try_into().map_err(|_| DownloadError::InvalidKey {
            uri: key_url.to_string(),
            reason: format!("expected 16 bytes, got {}", bytes.len()),
        })?;
        debug!(uri = %key_url, "Fetched AES-128 key");
        Ok(key)
    }
}

async fn fetch_text(fetcher: &dyn HttpFetch, url: &Url) -> Result<String, DownloadError> {
    let bytes = fetcher
        .fetch(url)
        .await
        .map_err(|e| DownloadError::manifest_fetch(url.as_str(), e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::test_support::MemoryFetcher;

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
360p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720
https://cdn.example.com/720p/index.m3u8?token=abc
";

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn media_playlist_resolves_to_itself() {
        let fetcher = MemoryFetcher::new()
            .with_text("https://a.com/v/index.m3u8", "#EXTM3U\n#EXTINF:4,\n0.ts\n");
        let resolver = PlaylistResolver::new(Arc::new(fetcher), VariantSelection::FirstListed, 4);

        let resolved = resolver.resolve(&url("https://a.com/v/index.m3u8")).await.unwrap();
        assert_eq!(resolved.as_str(), "https://a.com/v/index.m3u8");
    }

    #[tokio::test]
    async fn variant_choice_follows_tie_break_rule() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_text("https://a.com/v/master.m3u8", MASTER)
                .with_text("https://a.com/v/360p/index.m3u8", "#EXTM3U\n")
                .with_text("https://cdn.example.com/720p/index.m3u8?token=abc", "#EXTM3U\n"),
        );
        let master = url("https://a.com/v/master.m3u8");

        let first = PlaylistResolver::new(fetcher.clone(), VariantSelection::FirstListed, 4);
        for _ in 0..3 {
            assert_eq!(
                first.resolve(&master).await.unwrap().as_str(),
                "https://a.com/v/360p/index.m3u8"
            );
        }

        let last = PlaylistResolver::new(fetcher, VariantSelection::LastListed, 4);
        assert_eq!(
            last.resolve(&master).await.unwrap().as_str(),
            "https://cdn.example.com/720p/index.m3u8?token=abc"
        );
    }

    #[tokio::test]
    async fn nested_masters_are_followed_up_to_the_depth_limit() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_text("https://a.com/top.m3u8", "#EXT-X-STREAM-INF:BANDWIDTH=1\nmid.m3u8\n")
                .with_text("https://a.com/mid.m3u8", "#EXT-X-STREAM-INF:BANDWIDTH=1\nleaf.m3u8\n")
                .with_text("https://a.com/leaf.m3u8", "#EXTM3U\n#EXTINF:2,\ns.ts\n"),
        );

        let resolver = PlaylistResolver::new(fetcher.clone(), VariantSelection::FirstListed, 2);
        let resolved = resolver
            .resolve_playlist(&url("https://a.com/top.m3u8"))
            .await
            .unwrap();
        assert_eq!(resolved.url.as_str(), "https://a.com/leaf.m3u8");
        assert!(resolved.body.contains("s.ts"));

        let shallow = PlaylistResolver::new(fetcher, VariantSelection::FirstListed, 1);
        let err = shallow.resolve(&url("https://a.com/top.m3u8")).await.unwrap_err();
        assert!(matches!(err, DownloadError::ManifestParse { .. }));
    }

    #[tokio::test]
    async fn master_without_variants_is_malformed() {
        let fetcher = MemoryFetcher::new()
            .with_text("https://a.com/m.m3u8", "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\n");
        let resolver = PlaylistResolver::new(Arc::new(fetcher), VariantSelection::LastListed, 4);
        let err = resolver.resolve(&url("https://a.com/m.m3u8")).await.unwrap_err();
        assert!(matches!(err, DownloadError::ManifestParse { .. }));
    }

    #[tokio::test]
    async fn unreachable_manifest_is_a_manifest_fetch_error() {
        let resolver = PlaylistResolver::new(
            Arc::new(MemoryFetcher::new()),
            VariantSelection::FirstListed,
            4,
        );
        let err = resolver.resolve(&url("https://a.com/gone.m3u8")).await.unwrap_err();
        assert!(matches!(err, DownloadError::ManifestFetch { .. }));
    }

    #[tokio::test]
    async fn segments_resolve_against_base_url() {
        let body = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXTINF:9.009,
seg0.ts
#EXTINF:9.009,
#EXT-X-DISCONTINUITY
/abs/seg1.ts
#EXTINF:3.0,
https://other.example.com/seg2.ts
#EXT-X-ENDLIST
";
        let parser = PlaylistParser::new(Arc::new(MemoryFetcher::new()));
        let playlist = parser
            .parse_text(&url("https://a.com/hls/v1/index.m3u8?sig=1"), body)
            .await
            .unwrap();

        let uris: Vec<_> = playlist.segments.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "https://a.com/hls/v1/seg0.ts",
                "https://a.com/abs/seg1.ts",
                "https://other.example.com/seg2.ts",
            ]
        );
        let indices: Vec<_> = playlist.segments.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(playlist.segments.iter().all(|s| s.key.is_none()));
        assert!(playlist.final_key.is_none());
    }

    #[tokio::test]
    async fn empty_playlist_is_not_an_error() {
        let parser = PlaylistParser::new(Arc::new(MemoryFetcher::new()));
        let playlist = parser
            .parse_text(&url("https://a.com/index.m3u8"), "#EXTM3U\n#EXTINF:4,\n")
            .await
            .unwrap();
        assert!(playlist.segments.is_empty());
    }

    #[tokio::test]
    async fn crlf_and_uris_without_segment_info_are_handled() {
        let body = "#EXTM3U\r\nstray.ts\r\n#EXTINF:4,\r\n\r\na.ts\r\n";
        let parser = PlaylistParser::new(Arc::new(MemoryFetcher::new()));
        let playlist = parser
            .parse_text(&url("https://a.com/index.m3u8"), body)
            .await
            .unwrap();
        assert_eq!(playlist.segments.len(), 1);
        assert_eq!(playlist.segments[0].uri.as_str(), "https://a.com/a.ts");
    }

    #[tokio::test]
    async fn key_sections_apply_to_following_segments() {
        let key_a = [0x11u8; 16];
        let key_b = [0x22u8; 16];
        let fetcher = MemoryFetcher::new()
            .with_bytes("https://a.com/v/a.key", key_a.to_vec())
            .with_bytes("https://a.com/keys/b.key", key_b.to_vec());
        let body = r#"#EXTM3U
#EXTINF:4,
plain.ts
#EXT-X-KEY:METHOD=AES-128,URI="a.key"
#EXTINF:4,
s1.ts
#EXTINF:4,
s2.ts
#EXT-X-KEY:METHOD=AES-128,URI="/keys/b.key",IV=0x00000000000000000000000000000000
#EXTINF:4,
s3.ts
#EXT-X-KEY:METHOD=NONE
#EXTINF:4,
s4.ts
"#;
        let parser = PlaylistParser::new(Arc::new(fetcher));
        let playlist = parser
            .parse_text(&url("https://a.com/v/index.m3u8"), body)
            .await
            .unwrap();

        let keys: Vec<Option<[u8; 16]>> = playlist
            .segments
            .iter()
            .map(|s| s.key.as_ref().map(|k| k.key))
            .collect();
        assert_eq!(keys, vec![None, Some(key_a), Some(key_a), Some(key_b), None]);
        assert_eq!(
            playlist.segments[3].key.as_ref().unwrap().method,
            EncryptionMethod::Aes128
        );
        assert!(playlist.final_key.is_none());
    }

    #[tokio::test]
    async fn repeated_key_uri_is_fetched_once() {
        let fetcher = Arc::new(MemoryFetcher::new().with_bytes("https://a.com/k.key", vec![7u8; 16]));
        let body = "#EXT-X-KEY:METHOD=AES-128,URI=\"k.key\"\n#EXTINF:1,\na.ts\n\
                    #EXT-X-KEY:METHOD=AES-128,URI=\"k.key\"\n#EXTINF:1,\nb.ts\n";
        let parser = PlaylistParser::new(fetcher.clone());
        let playlist = parser
            .parse_text(&url("https://a.com/index.m3u8"), body)
            .await
            .unwrap();
        assert_eq!(playlist.segments.len(), 2);
        assert_eq!(fetcher.hits("https://a.com/k.key"), 1);
        assert_eq!(playlist.final_key.unwrap().key, [7u8; 16]);
    }

    #[tokio::test]
    async fn key_problems_are_fatal() {
        let short = MemoryFetcher::new().with_bytes("https://a.com/k.key", vec![1u8; 8]);
        let parser = PlaylistParser::new(Arc::new(short));
        let err = parser
            .parse_text(
                &url("https://a.com/index.m3u8"),
                "#EXT-X-KEY:METHOD=AES-128,URI=\"k.key\"\n#EXTINF:1,\na.ts\n",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidKey { .. }));

        let parser = PlaylistParser::new(Arc::new(MemoryFetcher::new()));
        let err = parser
            .parse_text(
                &url("https://a.com/index.m3u8"),
                "#EXT-X-KEY:METHOD=AES-128,URI=\"missing.key\"\n",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::KeyFetch { .. }));

        let err = parser
            .parse_text(
                &url("https://a.com/index.m3u8"),
                "#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"k.key\"\n",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedEncryption { .. }));
    }

    #[tokio::test]
    async fn incomplete_key_lines_are_malformed() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let parser = PlaylistParser::new(fetcher.clone());

        for body in [
            "#EXT-X-KEY:URI=\"k.key\"\n#EXTINF:1,\na.ts\n",
            "#EXT-X-KEY:METHOD=AES-128\n#EXTINF:1,\na.ts\n",
        ] {
            let err = parser
                .parse_text(&url("https://a.com/index.m3u8"), body)
                .await
                .unwrap_err();
            assert!(matches!(err, DownloadError::ManifestParse { .. }), "{body}");
        }
        assert_eq!(fetcher.total_hits(), 0);
    }
}
