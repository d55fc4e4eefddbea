use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use parking_lot::RwLock;
use url::Url;

use crate::single_flight::SingleFlight;
use crate::PassthroughError;

/// Abstracts the actual upstream GET so this crate doesn't depend on a
/// specific HTTP client; the relay core supplies a `reqwest`-backed impl.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Bytes, PassthroughError>;
}

/// Caches and single-flights one channel's HLS media playlist plus its
/// segments, rewriting segment URIs to canonical proxy URLs carrying
/// `format=hls&seg=<index>`.
pub struct HlsPassthroughCache {
    playlist_cache: Cache<(), Bytes>,
    segment_cache: Cache<usize, Bytes>,
    playlist_flight: SingleFlight<()>,
    segment_flight: SingleFlight<usize>,
    segment_urls: RwLock<Vec<Url>>,
}

impl HlsPassthroughCache {
    pub fn new(playlist_ttl: Duration, segment_cache_capacity: u64) -> Self {
        Self {
            playlist_cache: Cache::builder().time_to_live(playlist_ttl).max_capacity(1).build(),
            segment_cache: Cache::builder().max_capacity(segment_cache_capacity).build(),
            playlist_flight: SingleFlight::new(),
            segment_flight: SingleFlight::new(),
            segment_urls: RwLock::new(Vec::new()),
        }
    }

    /// Fetches (or returns the cached) upstream playlist, rewrites every
    /// segment URI to `proxy_base?format=hls&seg=<index>`, and records the
    /// resolved upstream segment URLs for later `serve_segment` calls.
    pub async fn serve_playlist(
        &self,
        upstream: &Arc<dyn Upstream>,
        upstream_url: &Url,
        proxy_base: &Url,
    ) -> Result<Bytes, PassthroughError> {
        if let Some(cached) = self.playlist_cache.get(&()).await {
            return Ok(cached);
        }

        let upstream = upstream.clone();
        let upstream_url = upstream_url.clone();
        let raw = self
            .playlist_flight
            .run((), || async move { upstream.get(&upstream_url).await })
            .await?;

        let rewritten = self.rewrite_playlist(&raw, proxy_base.clone());
        self.playlist_cache.insert((), rewritten.clone()).await;
        Ok(rewritten)
    }

    fn rewrite_playlist(&self, raw: &Bytes, proxy_base: Url) -> Bytes {
        let text = String::from_utf8_lossy(raw);
        let mut resolved_urls = Vec::new();
        let mut out = String::with_capacity(text.len());

        for line in text.lines() {
            if line.starts_with('#') || line.trim().is_empty() {
                out.push_str(line);
                out.push('\n');
                continue;
            }
            let index = resolved_urls.len();
            if let Ok(segment_url) = proxy_base.join(line.trim()) {
                resolved_urls.push(segment_url);
            }
            let mut proxied = proxy_base.clone();
            proxied.set_query(Some(&format!("format=hls&seg={index}")));
            out.push_str(proxied.as_str());
            out.push('\n');
        }

        *self.segment_urls.write() = resolved_urls;
        Bytes::from(out.into_bytes())
    }

    pub async fn serve_segment(
        &self,
        upstream: &Arc<dyn Upstream>,
        index: usize,
    ) -> Result<Bytes, PassthroughError> {
        if let Some(cached) = self.segment_cache.get(&index).await {
            return Ok(cached);
        }
        let segment_url = self
            .segment_urls
            .read()
            .get(index)
            .cloned()
            .ok_or(PassthroughError::SegmentNotFound)?;

        let upstream = upstream.clone();
        let bytes = self
            .segment_flight
            .run(index, move || async move { upstream.get(&segment_url).await })
            .await?;
        self.segment_cache.insert(index, bytes.clone()).await;
        Ok(bytes)
    }
}
