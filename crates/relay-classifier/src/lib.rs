//! Probes an upstream URL and decides how the relay should ingest it:
//! raw MPEG-TS passthrough, a collapsible HLS rendition the relay can
//! re-mux into continuous TS, transparent HLS/DASH passthrough, or
//! unknown.
//!
//! Grounded on `mesio::hls::playlist`'s fetch-and-parse shape (reqwest
//! client, `m3u8_rs::parse_playlist_res`, `url::Url` base resolution) and
//! the teacher's `downloader::stream_selector` descending-bandwidth sort.
//! DASH probing is new surface (the teacher has no DASH code) built on
//! `quick-xml` for a cheap structural read of the manifest root element.

use std::time::Duration;

use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist};
use thiserror::Error;
use tracing::{debug, trace, warn};
use url::Url;

const DEFAULT_PLAYLIST_MAX_BYTES: usize = 256 * 1024;
const DEFAULT_PLAYLIST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyMode {
    PassthroughRawTs,
    CollapsedHls,
    TransparentHls,
    PassthroughHls,
    PassthroughDash,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ClassifyResult {
    pub mode: ClassifyMode,
    pub source_format: Option<String>,
    pub variant_count: usize,
    pub target_duration: Option<f32>,
    pub encrypted: bool,
    pub fmp4: bool,
    /// Human-readable explanations for negative findings; always present,
    /// even on a successful classification, to help operators audit why a
    /// stream did or didn't collapse.
    pub reasons: Vec<String>,
}

impl ClassifyResult {
    fn unknown(reason: impl Into<String>) -> Self {
        Self {
            mode: ClassifyMode::Unknown,
            source_format: None,
            variant_count: 0,
            target_duration: None,
            encrypted: false,
            fmp4: false,
            reasons: vec![reason.into()],
        }
    }
}

pub struct StreamClassifier {
    http: reqwest::Client,
    playlist_max_bytes: usize,
    playlist_timeout: Duration,
}

impl StreamClassifier {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            playlist_max_bytes: DEFAULT_PLAYLIST_MAX_BYTES,
            playlist_timeout: DEFAULT_PLAYLIST_TIMEOUT,
        }
    }

    pub fn with_limits(http: reqwest::Client, max_bytes: usize, timeout: Duration) -> Self {
        Self {
            http,
            playlist_max_bytes: max_bytes,
            playlist_timeout: timeout,
        }
    }

    pub async fn classify(&self, url: &Url) -> ClassifyResult {
        let path = url.path().to_ascii_lowercase();

        if path.ends_with(".ts") {
            return ClassifyResult {
                mode: ClassifyMode::PassthroughRawTs,
                source_format: Some("ts".to_string()),
                variant_count: 1,
                target_duration: None,
                encrypted: false,
                fmp4: false,
                reasons: Vec::new(),
            };
        }

        if path.ends_with(".mpd") || path.contains("manifest(format=mpd") {
            return self.classify_dash(url).await;
        }

        if path.ends_with(".m3u8") || path.ends_with(".m3u") {
            return self.classify_hls(url).await;
        }

        if path.ends_with(".mp4")
            || path.ends_with(".mkv")
            || path.ends_with(".mov")
            || path.ends_with(".avi")
        {
            return ClassifyResult::unknown("progressive container, not a live streaming format");
        }

        ClassifyResult::unknown("unrecognized URL suffix")
    }

    async fn classify_dash(&self, url: &Url) -> ClassifyResult {
        if let Err(err) = self.head(url).await {
            return ClassifyResult::unknown(format!("DASH manifest HEAD failed: {err}"));
        }

        let bytes = match self.fetch_playlist_bytes(url).await {
            Ok(b) => b,
            Err(err) => return ClassifyResult::unknown(format!("DASH manifest GET failed: {err}")),
        };
        if !looks_like_mpd(&bytes) {
            return ClassifyResult::unknown("DASH manifest body has no <MPD> root element");
        }

        ClassifyResult {
            mode: ClassifyMode::PassthroughDash,
            source_format: Some("dash".to_string()),
            variant_count: 1,
            target_duration: None,
            encrypted: false,
            fmp4: true,
            reasons: Vec::new(),
        }
    }

    async fn head(&self, url: &Url) -> Result<(), ClassifyError> {
        let fut = self.http.head(url.clone()).send();
        let response = tokio::time::timeout(self.playlist_timeout, fut)
            .await
            .map_err(|_| ClassifyError::Timeout)??;
        if !response.status().is_success() {
            return Err(ClassifyError::Request(
                response.error_for_status().unwrap_err(),
            ));
        }
        Ok(())
    }

    async fn fetch_playlist_bytes(&self, url: &Url) -> Result<Vec<u8>, ClassifyError> {
        let fut = self.http.get(url.clone()).send();
        let response = tokio::time::timeout(self.playlist_timeout, fut)
            .await
            .map_err(|_| ClassifyError::Timeout)??;
        let response = response.error_for_status()?;
        let bytes = tokio::time::timeout(self.playlist_timeout, response.bytes())
            .await
            .map_err(|_| ClassifyError::Timeout)??;
        let capped = bytes.len().min(self.playlist_max_bytes);
        Ok(bytes[..capped].to_vec())
    }

    async fn classify_hls(&self, url: &Url) -> ClassifyResult {
        let bytes = match self.fetch_playlist_bytes(url).await {
            Ok(b) => b,
            Err(err) => return ClassifyResult::unknown(format!("playlist fetch failed: {err}")),
        };

        let playlist = match m3u8_rs::parse_playlist_res(&bytes) {
            Ok(playlist) => playlist,
            Err(err) => return ClassifyResult::unknown(format!("playlist parse failed: {err}")),
        };

        match playlist {
            Playlist::MasterPlaylist(master) => self.classify_master(url, &master).await,
            Playlist::MediaPlaylist(media) => {
                let mut reasons = Vec::new();
                if is_collapsible(&media, &mut reasons) {
                    ClassifyResult {
                        mode: ClassifyMode::CollapsedHls,
                        source_format: Some("hls".to_string()),
                        variant_count: 1,
                        target_duration: Some(media.target_duration as f32),
                        encrypted: false,
                        fmp4: false,
                        reasons,
                    }
                } else {
                    ClassifyResult {
                        mode: ClassifyMode::TransparentHls,
                        source_format: Some("hls".to_string()),
                        variant_count: 1,
                        target_duration: Some(media.target_duration as f32),
                        encrypted: media.segments.iter().any(|s| s.key.is_some()),
                        fmp4: media.segments.iter().any(|s| s.map.is_some()),
                        reasons,
                    }
                }
            }
        }
    }

    async fn classify_master(&self, base_url: &Url, master: &MasterPlaylist) -> ClassifyResult {
        let mut variants: Vec<_> = master.variants.iter().collect();
        variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));

        let mut reasons = Vec::new();
        for variant in &variants {
            let variant_url = match base_url.join(&variant.uri) {
                Ok(u) => u,
                Err(err) => {
                    reasons.push(format!("variant {} unresolvable: {err}", variant.uri));
                    continue;
                }
            };
            let bytes = match self.fetch_playlist_bytes(&variant_url).await {
                Ok(b) => b,
                Err(err) => {
                    reasons.push(format!("variant {} fetch failed: {err}", variant.uri));
                    continue;
                }
            };
            let media = match m3u8_rs::parse_media_playlist_res(&bytes) {
                Ok(m) => m,
                Err(err) => {
                    reasons.push(format!("variant {} parse failed: {err}", variant.uri));
                    continue;
                }
            };
            if is_collapsible(&media, &mut reasons) {
                debug!(uri = %variant.uri, "selected collapsible variant");
                return ClassifyResult {
                    mode: ClassifyMode::CollapsedHls,
                    source_format: Some("hls".to_string()),
                    variant_count: variants.len(),
                    target_duration: Some(media.target_duration as f32),
                    encrypted: false,
                    fmp4: false,
                    reasons,
                };
            }
        }

        trace!(reasons = ?reasons, "no variant qualified for collapsing");
        ClassifyResult {
            mode: ClassifyMode::TransparentHls,
            source_format: Some("hls".to_string()),
            variant_count: variants.len(),
            target_duration: None,
            encrypted: false,
            fmp4: false,
            reasons,
        }
    }
}

/// A variant/media playlist is collapsible when it is unencrypted,
/// uses only `.ts` segments, carries no `EXT-X-MAP` (fMP4 init segment)
/// reference, and is non-empty.
fn is_collapsible(media: &MediaPlaylist, reasons: &mut Vec<String>) -> bool {
    if media.segments.is_empty() {
        reasons.push("media playlist has no segments".to_string());
        return false;
    }
    if media.segments.iter().any(|s| s.key.is_some()) {
        reasons.push("media playlist is encrypted".to_string());
        return false;
    }
    if media.segments.iter().any(|s| s.map.is_some()) {
        reasons.push("media playlist references an fMP4 init segment".to_string());
        return false;
    }
    if media
        .segments
        .iter()
        .any(|s| !s.uri.to_ascii_lowercase().ends_with(".ts"))
    {
        reasons.push("media playlist has non-.ts segments".to_string());
        return false;
    }
    true
}

/// Minimal structural probe of a DASH MPD's root element, used only to
/// confirm the document is well-formed XML before passthrough; the relay
/// never re-muxes DASH, so a full MPD model is unnecessary.
pub fn looks_like_mpd(bytes: &[u8]) -> bool {
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(tag)) => {
                return tag.local_name().as_ref() == b"MPD";
            }
            Ok(quick_xml::events::Event::Eof) => return false,
            Ok(_) => continue,
            Err(err) => {
                warn!(%err, "MPD probe XML parse error");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_mpd_true_for_mpd_root() {
        let xml = br#"<?xml version="1.0"?><MPD xmlns="urn:mpeg:dash:schema:mpd:2011"></MPD>"#;
        assert!(looks_like_mpd(xml));
    }

    #[test]
    fn test_looks_like_mpd_false_for_other_root() {
        let xml = br#"<?xml version="1.0"?><rss></rss>"#;
        assert!(!looks_like_mpd(xml));
    }

    #[tokio::test]
    async fn test_classify_ts_suffix_is_raw_passthrough() {
        let classifier = StreamClassifier::new(reqwest::Client::new());
        let url = Url::parse("http://example.com/live/stream.ts").unwrap();
        let result = classifier.classify(&url).await;
        assert_eq!(result.mode, ClassifyMode::PassthroughRawTs);
    }

    #[tokio::test]
    async fn test_classify_progressive_container_is_unknown() {
        let classifier = StreamClassifier::new(reqwest::Client::new());
        let url = Url::parse("http://example.com/vod/movie.mp4").unwrap();
        let result = classifier.classify(&url).await;
        assert_eq!(result.mode, ClassifyMode::Unknown);
        assert!(!result.reasons.is_empty());
    }

    #[tokio::test]
    async fn test_classify_hls_media_playlist_collapses_when_ts_only() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let playlist = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:2.0,\nseg0.ts\n#EXTINF:2.0,\nseg1.ts\n";
        Mock::given(method("GET"))
            .and(path("/live/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(playlist))
            .mount(&server)
            .await;

        let classifier = StreamClassifier::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/live/index.m3u8", server.uri())).unwrap();
        let result = classifier.classify(&url).await;
        assert_eq!(result.mode, ClassifyMode::CollapsedHls);
        assert_eq!(result.target_duration, Some(2.0));
    }

    #[tokio::test]
    async fn test_classify_hls_media_playlist_with_map_is_transparent() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let playlist = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:2.0,\nseg0.m4s\n";
        Mock::given(method("GET"))
            .and(path("/live/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(playlist))
            .mount(&server)
            .await;

        let classifier = StreamClassifier::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/live/index.m3u8", server.uri())).unwrap();
        let result = classifier.classify(&url).await;
        assert_eq!(result.mode, ClassifyMode::TransparentHls);
        assert!(result.fmp4);
    }

    #[tokio::test]
    async fn test_classify_dash_suffix_with_mpd_root_passes_through() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/live/manifest.mpd"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live/manifest.mpd"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0"?><MPD xmlns="urn:mpeg:dash:schema:mpd:2011"></MPD>"#,
            ))
            .mount(&server)
            .await;

        let classifier = StreamClassifier::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/live/manifest.mpd", server.uri())).unwrap();
        let result = classifier.classify(&url).await;
        assert_eq!(result.mode, ClassifyMode::PassthroughDash);
    }

    #[tokio::test]
    async fn test_classify_dash_suffix_with_non_mpd_body_is_unknown() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/live/manifest.mpd"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live/manifest.mpd"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<?xml version=\"1.0\"?><rss></rss>"))
            .mount(&server)
            .await;

        let classifier = StreamClassifier::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/live/manifest.mpd", server.uri())).unwrap();
        let result = classifier.classify(&url).await;
        assert_eq!(result.mode, ClassifyMode::Unknown);
    }

    #[tokio::test]
    async fn test_classify_unreachable_host_is_unknown() {
        let classifier =
            StreamClassifier::with_limits(reqwest::Client::new(), 1024, Duration::from_millis(200));
        let url = Url::parse("http://127.0.0.1:1/index.m3u8").unwrap();
        let result = classifier.classify(&url).await;
        assert_eq!(result.mode, ClassifyMode::Unknown);
    }
}
