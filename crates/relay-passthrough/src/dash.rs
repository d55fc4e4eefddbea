use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use parking_lot::RwLock;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use url::Url;

use crate::single_flight::SingleFlight;
use crate::PassthroughError;

/// Same abstraction as the HLS side's `Upstream`, reused so a single
/// `reqwest`-backed implementation in the relay core serves both formats.
#[async_trait]
pub trait DashUpstream: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Bytes, PassthroughError>;
}

/// Caches and single-flights one channel's DASH manifest plus its init
/// and media segments. Segment identity in DASH is `(track, id)` rather
/// than a single running index, since video and audio have independent
/// segment timelines.
pub struct DashPassthroughCache {
    manifest_cache: Cache<(), Bytes>,
    init_cache: Cache<String, Bytes>,
    segment_cache: Cache<(String, usize), Bytes>,
    manifest_flight: SingleFlight<()>,
    init_flight: SingleFlight<String>,
    segment_flight: SingleFlight<(String, usize)>,
    init_urls: RwLock<HashMap<String, Url>>,
    segment_urls: RwLock<HashMap<String, Vec<Url>>>,
}

impl DashPassthroughCache {
    pub fn new(manifest_ttl: Duration, segment_cache_capacity: u64) -> Self {
        Self {
            manifest_cache: Cache::builder().time_to_live(manifest_ttl).max_capacity(1).build(),
            init_cache: Cache::builder().max_capacity(16).build(),
            segment_cache: Cache::builder().max_capacity(segment_cache_capacity).build(),
            manifest_flight: SingleFlight::new(),
            init_flight: SingleFlight::new(),
            segment_flight: SingleFlight::new(),
            init_urls: RwLock::new(HashMap::new()),
            segment_urls: RwLock::new(HashMap::new()),
        }
    }

    /// Fetches (or returns the cached) upstream MPD, extracts every init
    /// and media segment URL per track, installs the `track -> url` and
    /// `(track, index) -> url` mapping tables, then rewrites the manifest
    /// to reference this proxy for every subsequent request.
    pub async fn serve_manifest(
        &self,
        upstream: &Arc<dyn DashUpstream>,
        upstream_url: &Url,
        proxy_base: &Url,
    ) -> Result<Bytes, PassthroughError> {
        if let Some(cached) = self.manifest_cache.get(&()).await {
            return Ok(cached);
        }

        let upstream_clone = upstream.clone();
        let fetch_url = upstream_url.clone();
        let raw = self
            .manifest_flight
            .run((), || async move { upstream_clone.get(&fetch_url).await })
            .await?;

        let rewritten = self.rewrite_manifest(&raw, upstream_url, proxy_base);
        self.manifest_cache.insert((), rewritten.clone()).await;
        Ok(rewritten)
    }

    fn rewrite_manifest(&self, raw: &Bytes, upstream_url: &Url, proxy_base: &Url) -> Bytes {
        let tracks = extract_track_urls(raw, upstream_url);

        let mut init_urls = HashMap::new();
        let mut segment_urls = HashMap::new();
        let mut out = String::from_utf8_lossy(raw).into_owned();

        for track in &tracks {
            if let Some(init) = &track.init_url {
                init_urls.insert(track.id.clone(), init.clone());
                let proxied = format!("format=dash&init=1&track={}", track.id);
                out = out.replacen(init.as_str(), &with_query(proxy_base, &proxied), 1);
            }
            let mut resolved = Vec::with_capacity(track.media_urls.len());
            for (index, media_url) in track.media_urls.iter().enumerate() {
                resolved.push(media_url.clone());
                let proxied = format!("format=dash&seg={index}&track={}", track.id);
                out = out.replacen(media_url.as_str(), &with_query(proxy_base, &proxied), 1);
            }
            segment_urls.insert(track.id.clone(), resolved);
        }

        *self.init_urls.write() = init_urls;
        *self.segment_urls.write() = segment_urls;
        Bytes::from(out.into_bytes())
    }

    pub async fn serve_init_segment(
        &self,
        upstream: &Arc<dyn DashUpstream>,
        track: &str,
    ) -> Result<Bytes, PassthroughError> {
        if let Some(cached) = self.init_cache.get(&track.to_string()).await {
            return Ok(cached);
        }
        let url = self
            .init_urls
            .read()
            .get(track)
            .cloned()
            .ok_or(PassthroughError::SegmentNotFound)?;

        let upstream = upstream.clone();
        let key = track.to_string();
        let bytes = self
            .init_flight
            .run(key.clone(), move || async move { upstream.get(&url).await })
            .await?;
        self.init_cache.insert(key, bytes.clone()).await;
        Ok(bytes)
    }

    pub async fn serve_segment(
        &self,
        upstream: &Arc<dyn DashUpstream>,
        track: &str,
        index: usize,
    ) -> Result<Bytes, PassthroughError> {
        let cache_key = (track.to_string(), index);
        if let Some(cached) = self.segment_cache.get(&cache_key).await {
            return Ok(cached);
        }
        let url = self
            .segment_urls
            .read()
            .get(track)
            .and_then(|urls| urls.get(index))
            .cloned()
            .ok_or(PassthroughError::SegmentNotFound)?;

        let upstream = upstream.clone();
        let flight_key = cache_key.clone();
        let bytes = self
            .segment_flight
            .run(flight_key, move || async move { upstream.get(&url).await })
            .await?;
        self.segment_cache.insert(cache_key, bytes.clone()).await;
        Ok(bytes)
    }
}

fn with_query(base: &Url, query: &str) -> String {
    let mut url = base.clone();
    url.set_query(Some(query));
    url.to_string()
}

struct TrackUrls {
    id: String,
    init_url: Option<Url>,
    media_urls: Vec<Url>,
}

/// Walks an MPD with a streaming `quick_xml::Reader`, pulling `BaseURL`,
/// `Initialization@sourceURL`, and `SegmentURL@media` out of each
/// `AdaptationSet`/`Representation`. Only the URL attributes this crate
/// needs to proxy are read; everything else in the manifest passes
/// through the text rewrite untouched.
fn extract_track_urls(raw: &Bytes, upstream_url: &Url) -> Vec<TrackUrls> {
    let mut reader = Reader::from_reader(raw.as_ref());
    reader.config_mut().trim_text(true);

    let mut tracks = Vec::new();
    let mut current: Option<TrackUrls> = None;
    let mut track_counter = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local {
                    "AdaptationSet" | "Representation" if current.is_none() => {
                        track_counter += 1;
                        current = Some(TrackUrls {
                            id: format!("t{track_counter}"),
                            init_url: None,
                            media_urls: Vec::new(),
                        });
                    }
                    "Initialization" => {
                        if let Some(track) = current.as_mut() {
                            if let Some(source) = attr(e, b"sourceURL") {
                                track.init_url = resolve(upstream_url, &source);
                            }
                        }
                    }
                    "SegmentURL" => {
                        if let Some(track) = current.as_mut() {
                            if let Some(media) = attr(e, b"media") {
                                if let Some(resolved) = resolve(upstream_url, &media) {
                                    track.media_urls.push(resolved);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name(e.name().as_ref());
                if (local == "AdaptationSet" || local == "Representation") && current.is_some() {
                    tracks.push(current.take().unwrap());
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    tracks
}

fn local_name(qualified: &[u8]) -> &str {
    let name = std::str::from_utf8(qualified).unwrap_or("");
    name.rsplit(':').next().unwrap_or(name)
}

fn attr(e: &quick_xml::events::BytesStart, key: &[u8]) -> Option<String> {
    e.attributes().flatten().find(|a| a.key.as_ref() == key).and_then(|a| {
        a.unescape_value().ok().map(|v| v.into_owned())
    })
}

fn resolve(base: &Url, reference: &str) -> Option<Url> {
    base.join(reference).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MANIFEST: &str = r#"<?xml version="1.0"?>
<MPD>
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="v0">
        <SegmentList>
          <Initialization sourceURL="init-v0.m4s"/>
          <SegmentURL media="seg-v0-0.m4s"/>
          <SegmentURL media="seg-v0-1.m4s"/>
        </SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    struct FakeUpstream {
        calls: Arc<AtomicUsize>,
        by_path: HashMap<String, Bytes>,
    }

    #[async_trait]
    impl DashUpstream for FakeUpstream {
        async fn get(&self, url: &Url) -> Result<Bytes, PassthroughError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = url.path().rsplit('/').next().unwrap_or("");
            self.by_path.get(path).cloned().ok_or(PassthroughError::SegmentNotFound)
        }
    }

    fn fake_upstream() -> (Arc<dyn DashUpstream>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut by_path = HashMap::new();
        by_path.insert("manifest.mpd".to_string(), Bytes::from_static(MANIFEST.as_bytes()));
        by_path.insert("init-v0.m4s".to_string(), Bytes::from_static(b"init"));
        by_path.insert("seg-v0-0.m4s".to_string(), Bytes::from_static(b"seg0"));
        by_path.insert("seg-v0-1.m4s".to_string(), Bytes::from_static(b"seg1"));
        let upstream: Arc<dyn DashUpstream> =
            Arc::new(FakeUpstream { calls: calls.clone(), by_path });
        (upstream, calls)
    }

    #[tokio::test]
    async fn test_serve_manifest_rewrites_init_and_segment_urls() {
        let (upstream, _calls) = fake_upstream();
        let cache = DashPassthroughCache::new(Duration::from_millis(500), 10);
        let upstream_url = Url::parse("http://u/live/manifest.mpd").unwrap();
        let proxy_base = Url::parse("http://proxy/stream/test").unwrap();

        let manifest = cache.serve_manifest(&upstream, &upstream_url, &proxy_base).await.unwrap();
        let text = String::from_utf8(manifest.to_vec()).unwrap();
        assert!(text.contains("format=dash&init=1&track=t1"));
        assert!(text.contains("format=dash&seg=0&track=t1"));
        assert!(text.contains("format=dash&seg=1&track=t1"));
    }

    #[tokio::test]
    async fn test_serve_init_segment_resolves_recorded_url() {
        let (upstream, calls) = fake_upstream();
        let cache = DashPassthroughCache::new(Duration::from_millis(500), 10);
        let upstream_url = Url::parse("http://u/live/manifest.mpd").unwrap();
        let proxy_base = Url::parse("http://proxy/stream/test").unwrap();
        cache.serve_manifest(&upstream, &upstream_url, &proxy_base).await.unwrap();

        let init = cache.serve_init_segment(&upstream, "t1").await.unwrap();
        assert_eq!(init, Bytes::from_static(b"init"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_serve_segment_unknown_track_is_not_found() {
        let (upstream, _calls) = fake_upstream();
        let cache = DashPassthroughCache::new(Duration::from_millis(500), 10);
        let result = cache.serve_segment(&upstream, "missing", 0).await;
        assert!(matches!(result, Err(PassthroughError::SegmentNotFound)));
    }
}
