use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::RwLock;
use relay_bandwidth::BandwidthTracker;
use relay_classifier::{ClassifyMode, StreamClassifier};
use relay_collapse::{CollapseOutcome, CollapserConfig, HlsCollapser};
use relay_passthrough::{DashPassthroughCache, HlsPassthroughCache};
use tokio::sync::broadcast;
use tracing::{info, warn};
use ts::demux::TsDemuxer;
use url::Url;

const BANDWIDTH_WINDOW: std::time::Duration = std::time::Duration::from_secs(10);

use crate::codec::{audio_codec_for, video_codec_for};
use crate::error::RelayError;
use crate::state::AppState;

const RAW_TS_BROADCAST_CAPACITY: usize = 256;

/// How a registered channel is actually served once its upstream has been
/// classified. `EsBacked` channels are demuxed into the channel's
/// `relay_es::SharedEsBuffer` and re-muxed on demand by a `relay_segmenter`;
/// the two passthrough variants bypass the ES buffer entirely and are
/// served straight from the matching cache.
pub enum ChannelRoute {
    EsBacked,
    Hls(Arc<HlsPassthroughCache>),
    Dash(Arc<DashPassthroughCache>),
}

/// Tracks which upstream feeds each channel, the route decided for it
/// once classified, and (for `EsBacked` raw-TS channels) the broadcast of
/// raw bytes that `?format=mpegts` clients tap into directly.
///
/// Kept as relay-core's own bookkeeping rather than folded into
/// `relay_session::SessionManager`, which only owns the ES buffer and
/// segmenters the way `relay_breaker::CircuitBreakerRegistry` owns only
/// breakers.
pub struct IngestRegistry {
    channel_urls: RwLock<HashMap<String, Url>>,
    routes: RwLock<HashMap<String, Arc<ChannelRoute>>>,
    raw_ts_taps: RwLock<HashMap<String, broadcast::Sender<Bytes>>>,
    ingest_bandwidth: RwLock<HashMap<String, Arc<BandwidthTracker>>>,
}

impl IngestRegistry {
    pub fn new() -> Self {
        Self {
            channel_urls: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            raw_ts_taps: RwLock::new(HashMap::new()),
            ingest_bandwidth: RwLock::new(HashMap::new()),
        }
    }

    /// Rolling ingest byte-rate for a channel, for operator-facing
    /// observability; `None` until the channel's ingest pump has started.
    pub fn ingest_bandwidth(&self, channel_id: &str) -> Option<relay_bandwidth::BandwidthStats> {
        self.ingest_bandwidth.read().get(channel_id).map(|tracker| tracker.stats())
    }

    fn bandwidth_tracker(&self, channel_id: &str) -> Arc<BandwidthTracker> {
        self.ingest_bandwidth
            .write()
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(BandwidthTracker::new(BANDWIDTH_WINDOW)))
            .clone()
    }

    /// Associates a channel id with the upstream URL to classify and
    /// ingest on first request. The spec's client-facing surface has no
    /// way to carry this itself, so it's an out-of-band admin concern;
    /// relay-core exposes it as a plain method for whatever provisioning
    /// layer calls it (tests, an admin CLI, a config file loader).
    pub fn register_channel(&self, channel_id: impl Into<String>, upstream_url: Url) {
        self.channel_urls.write().insert(channel_id.into(), upstream_url);
    }

    pub fn route_for(&self, channel_id: &str) -> Option<Arc<ChannelRoute>> {
        self.routes.read().get(channel_id).cloned()
    }

    pub fn upstream_for(&self, channel_id: &str) -> Option<Url> {
        self.channel_urls.read().get(channel_id).cloned()
    }

    pub fn raw_ts_tap(&self, channel_id: &str) -> Option<broadcast::Receiver<Bytes>> {
        self.raw_ts_taps.read().get(channel_id).map(|tx| tx.subscribe())
    }

    fn raw_ts_sender(&self, channel_id: &str) -> broadcast::Sender<Bytes> {
        self.raw_ts_taps
            .write()
            .entry(channel_id.to_string())
            .or_insert_with(|| broadcast::channel(RAW_TS_BROADCAST_CAPACITY).0)
            .clone()
    }
}

impl Default for IngestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Classifies a channel's upstream on first access and spawns whatever
/// ingestion the classification calls for, caching the resulting route
/// for subsequent requests.
pub async fn ensure_started(state: &AppState, channel_id: &str) -> Result<Arc<ChannelRoute>, RelayError> {
    if let Some(route) = state.ingest.route_for(channel_id) {
        return Ok(route);
    }

    let upstream_url = state
        .ingest
        .upstream_for(channel_id)
        .ok_or_else(|| RelayError::BadRequest(format!("channel {channel_id} is not registered")))?;

    let classifier = StreamClassifier::new(state.http.clone());
    let result = classifier.classify(&upstream_url).await;
    info!(channel_id, mode = ?result.mode, reasons = ?result.reasons, "classified channel upstream");

    let route = match result.mode {
        ClassifyMode::PassthroughRawTs => {
            spawn_raw_ts_ingest(state.clone(), channel_id.to_string(), upstream_url);
            Arc::new(ChannelRoute::EsBacked)
        }
        ClassifyMode::CollapsedHls => {
            spawn_collapsed_hls_ingest(state.clone(), channel_id.to_string(), upstream_url);
            Arc::new(ChannelRoute::EsBacked)
        }
        // `PassthroughHls` is reserved in the classifier but never
        // actually constructed today; treat it the same as
        // `TransparentHls` so the relay stays correct if that changes.
        ClassifyMode::TransparentHls | ClassifyMode::PassthroughHls => Arc::new(ChannelRoute::Hls(Arc::new(
            HlsPassthroughCache::new(state.config.passthrough_ttl, 64),
        ))),
        ClassifyMode::PassthroughDash => Arc::new(ChannelRoute::Dash(Arc::new(DashPassthroughCache::new(
            state.config.passthrough_ttl,
            64,
        )))),
        ClassifyMode::Unknown => {
            return Err(RelayError::UpstreamFatal(result.reasons.join("; ")));
        }
    };

    state.ingest.routes.write().insert(channel_id.to_string(), route.clone());
    Ok(route)
}

/// Streams a raw MPEG-TS upstream, demuxing it into the channel's ES
/// buffer and fanning the untouched bytes out to `?format=mpegts` taps.
fn spawn_raw_ts_ingest(state: AppState, channel_id: String, upstream_url: Url) {
    tokio::spawn(async move {
        let session = state.sessions.get_or_create(&channel_id);
        let buffer = session.buffer().clone();
        let tap = state.ingest.raw_ts_sender(&channel_id);
        let bandwidth = state.ingest.bandwidth_tracker(&channel_id);

        let response = match state.http.get(upstream_url.clone()).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(channel_id, error = %err, "raw TS ingest request failed");
                return;
            }
        };

        let mut demuxer = TsDemuxer::new();
        let mut video_codec_set = false;
        let mut audio_codec_set = false;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(channel_id, error = %err, "raw TS ingest stream error");
                    break;
                }
            };

            bandwidth.record(chunk.len() as u64);
            let _ = tap.send(chunk.clone());

            for unit in demuxer.push(&chunk) {
                if unit.is_video() {
                    if !video_codec_set {
                        if let Some(codec) = video_codec_for(unit.stream_type) {
                            buffer.set_video_codec(codec, Bytes::new());
                            video_codec_set = true;
                        }
                    }
                    buffer.write_video_to_source(
                        unit.pts.unwrap_or(0),
                        unit.dts.unwrap_or(0),
                        unit.data,
                        unit.keyframe,
                    );
                } else if unit.is_audio() {
                    if !audio_codec_set {
                        if let Some(codec) = audio_codec_for(unit.stream_type) {
                            buffer.set_audio_codec(codec, Bytes::new());
                            audio_codec_set = true;
                        }
                    }
                    buffer.write_audio_to_source(unit.pts.unwrap_or(0), unit.data);
                }
            }
        }

        info!(channel_id, "raw TS ingest ended");
    });
}

/// Runs an `HlsCollapser` against a collapsible HLS rendition and feeds
/// its continuous re-stitched TS bytes through the same demux path as a
/// raw-TS upstream.
fn spawn_collapsed_hls_ingest(state: AppState, channel_id: String, playlist_url: Url) {
    tokio::spawn(async move {
        let session = state.sessions.get_or_create(&channel_id);
        let buffer = session.buffer().clone();
        let tap = state.ingest.raw_ts_sender(&channel_id);
        let bandwidth = state.ingest.bandwidth_tracker(&channel_id);

        let collapser = Arc::new(HlsCollapser::new(state.http.clone(), CollapserConfig::default()));
        let (mut rx, outcome, _handle) = collapser.start(playlist_url);

        let mut demuxer = TsDemuxer::new();
        let mut video_codec_set = false;
        let mut audio_codec_set = false;

        while let Some(chunk) = rx.recv().await {
            bandwidth.record(chunk.len() as u64);
            let _ = tap.send(chunk.clone());

            for unit in demuxer.push(&chunk) {
                if unit.is_video() {
                    if !video_codec_set {
                        if let Some(codec) = video_codec_for(unit.stream_type) {
                            buffer.set_video_codec(codec, Bytes::new());
                            video_codec_set = true;
                        }
                    }
                    buffer.write_video_to_source(
                        unit.pts.unwrap_or(0),
                        unit.dts.unwrap_or(0),
                        unit.data,
                        unit.keyframe,
                    );
                } else if unit.is_audio() {
                    if !audio_codec_set {
                        if let Some(codec) = audio_codec_for(unit.stream_type) {
                            buffer.set_audio_codec(codec, Bytes::new());
                            audio_codec_set = true;
                        }
                    }
                    buffer.write_audio_to_source(unit.pts.unwrap_or(0), unit.data);
                }
            }
        }

        match outcome.await {
            Ok(CollapseOutcome::Eos) => info!(channel_id, "collapsed HLS ingest reached end of stream"),
            Ok(CollapseOutcome::Stopped) => info!(channel_id, "collapsed HLS ingest stopped"),
            Ok(CollapseOutcome::Failed(err)) => warn!(channel_id, error = %err, "collapsed HLS ingest failed"),
            Err(_) => warn!(channel_id, "collapsed HLS ingest outcome channel dropped"),
        }
    });
}
