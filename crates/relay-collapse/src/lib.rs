//! Follows an HLS media playlist and turns it into one continuous,
//! infinite MPEG-TS byte stream: dedupes segments the playlist re-serves,
//! demuxes and re-muxes each new segment to keep PTS/DTS advancing
//! smoothly across playlist restarts, and paces polling to the playlist's
//! own target duration.
//!
//! Grounded on `mesio::hls::playlist`'s adaptive-refresh-tracker shape
//! (kept as [`interval::PollIntervalTracker`], though the collapser's own
//! scaling rule differs from the teacher's backoff) and the new
//! `ts::demux`/`ts::mux` pair for the re-stitch itself.

mod continuity;
mod error;
mod interval;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use pipeline_common::CancellationToken;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use ts::demux::TsDemuxer;
use ts::mux::{MuxStream, TsMuxer};
use ts::pmt::StreamType;
use url::Url;

pub use continuity::{prepend_parameter_sets, PtsContinuity};
pub use error::CollapseError;
pub use interval::PollIntervalTracker;

const DEFAULT_MIN_POLL: Duration = Duration::from_millis(1_000);
const DEFAULT_SEGMENT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Debug, Clone)]
pub struct CollapserConfig {
    pub min_poll: Duration,
    pub segment_timeout: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for CollapserConfig {
    fn default() -> Self {
        Self {
            min_poll: DEFAULT_MIN_POLL,
            segment_timeout: DEFAULT_SEGMENT_TIMEOUT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// Why the collapser's output pipe closed.
#[derive(Debug, Clone)]
pub enum CollapseOutcome {
    /// Upstream playlist carried `#EXT-X-ENDLIST`.
    Eos,
    /// Aborted after `max_consecutive_failures` playlist or segment
    /// fetch failures in a row.
    Failed(CollapseError),
    /// `CollapserHandle::stop` was called, or the reader was dropped.
    Stopped,
}

pub struct HlsCollapser {
    http: reqwest::Client,
    config: CollapserConfig,
}

impl HlsCollapser {
    pub fn new(http: reqwest::Client, config: CollapserConfig) -> Self {
        Self { http, config }
    }

    /// Starts following `playlist_url`, returning the continuous TS byte
    /// reader, a one-shot signal of why it eventually stopped, and a
    /// handle to request early cancellation.
    pub fn start(
        self: Arc<Self>,
        playlist_url: Url,
    ) -> (mpsc::Receiver<Bytes>, oneshot::Receiver<CollapseOutcome>, CollapserHandle) {
        let (tx, rx) = mpsc::channel(32);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let token = CancellationToken::new();
        let child_token = token.child_token();

        let task = tokio::spawn(async move {
            let outcome = self.run(playlist_url, tx, child_token).await;
            let _ = outcome_tx.send(outcome);
        });

        (rx, outcome_rx, CollapserHandle { token, task })
    }

    async fn run(
        self: Arc<Self>,
        playlist_url: Url,
        tx: mpsc::Sender<Bytes>,
        token: CancellationToken,
    ) -> CollapseOutcome {
        let mut seen_sequences: HashSet<u64> = HashSet::new();
        let mut seen_uris: HashSet<String> = HashSet::new();
        let mut tracker: Option<PollIntervalTracker> = None;
        let mut remuxer = SegmentRemuxer::new();
        let mut consecutive_failures = 0u32;

        loop {
            if token.is_cancelled() {
                return CollapseOutcome::Stopped;
            }

            match self.fetch_playlist(&playlist_url).await {
                Ok(media) => {
                    consecutive_failures = 0;
                    if tracker.is_none() {
                        let target = Duration::from_secs_f32(media.target_duration.max(1.0));
                        tracker = Some(PollIntervalTracker::new(self.config.min_poll, target));
                    }

                    let mut new_count = 0usize;
                    for (offset, segment) in media.segments.iter().enumerate() {
                        let seq = media.media_sequence + offset as u64;
                        let seq_is_new = seen_sequences.insert(seq);
                        let uri_is_new = seen_uris.insert(segment.uri.clone());
                        if !seq_is_new || !uri_is_new {
                            continue;
                        }
                        new_count += 1;

                        let segment_url = match playlist_url.join(&segment.uri) {
                            Ok(u) => u,
                            Err(err) => {
                                warn!(uri = %segment.uri, %err, "unresolvable segment URI, skipping");
                                continue;
                            }
                        };

                        match self.fetch_segment(&segment_url).await {
                            Ok(raw) => {
                                let stitched = remuxer.feed(&raw);
                                if !stitched.is_empty() && tx.send(stitched).await.is_err() {
                                    return CollapseOutcome::Stopped;
                                }
                            }
                            Err(err) => {
                                warn!(%err, uri = %segment.uri, "segment fetch failed");
                                consecutive_failures += 1;
                                if consecutive_failures >= self.config.max_consecutive_failures {
                                    return CollapseOutcome::Failed(CollapseError::TooManyFailures);
                                }
                            }
                        }
                    }

                    if media.end_list {
                        return CollapseOutcome::Eos;
                    }
                    if let Some(tracker) = tracker.as_mut() {
                        tracker.record_new_segments(new_count);
                    }
                }
                Err(err) => {
                    warn!(%err, "playlist fetch/parse failed");
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        return CollapseOutcome::Failed(err);
                    }
                }
            }

            let wait = tracker.as_ref().map(|t| t.current()).unwrap_or(self.config.min_poll);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = token.cancelled() => return CollapseOutcome::Stopped,
            }
        }
    }

    async fn fetch_playlist(&self, url: &Url) -> Result<m3u8_rs::MediaPlaylist, CollapseError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| CollapseError::PlaylistRequest(err.to_string()))?
            .error_for_status()
            .map_err(|err| CollapseError::PlaylistRequest(err.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| CollapseError::PlaylistRequest(err.to_string()))?;
        m3u8_rs::parse_media_playlist_res(&bytes)
            .map_err(|err| CollapseError::PlaylistParse(err.to_string()))
    }

    async fn fetch_segment(&self, url: &Url) -> Result<Bytes, CollapseError> {
        let fut = self.http.get(url.clone()).send();
        let response = tokio::time::timeout(self.config.segment_timeout, fut)
            .await
            .map_err(|_| CollapseError::SegmentRequest("timed out".to_string()))?
            .map_err(|err| CollapseError::SegmentRequest(err.to_string()))?
            .error_for_status()
            .map_err(|err| CollapseError::SegmentRequest(err.to_string()))?;
        response
            .bytes()
            .await
            .map_err(|err| CollapseError::SegmentRequest(err.to_string()))
    }
}

pub struct CollapserHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl CollapserHandle {
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

/// Demuxes each incoming segment's access units, runs them through a
/// per-PID [`PtsContinuity`], and re-muxes them back into TS packets. The
/// underlying [`TsMuxer`] is created lazily once the first segment's PMT
/// reveals the program's elementary streams.
struct SegmentRemuxer {
    demux: TsDemuxer,
    mux: Option<TsMuxer>,
    continuity: HashMap<u16, PtsContinuity>,
}

impl SegmentRemuxer {
    fn new() -> Self {
        Self {
            demux: TsDemuxer::new(),
            mux: None,
            continuity: HashMap::new(),
        }
    }

    fn feed(&mut self, raw: &[u8]) -> Bytes {
        let units = self.demux.push(raw);
        if units.is_empty() {
            return Bytes::new();
        }

        if self.mux.is_none() {
            let streams: Vec<_> = self
                .demux
                .known_streams()
                .into_iter()
                .map(|(pid, stream_type)| MuxStream { pid, stream_type })
                .collect();
            if streams.is_empty() {
                return Bytes::new();
            }
            let pcr_pid = streams
                .iter()
                .find(|s| s.stream_type.is_video())
                .or_else(|| streams.first())
                .map(|s| s.pid)
                .unwrap_or(0x100);
            self.mux = Some(TsMuxer::new(1, 0x20, pcr_pid, streams));
        }

        let Some(mux) = self.mux.as_mut() else {
            return Bytes::new();
        };

        let mut out = BytesMut::new();
        for unit in units {
            let Some(raw_pts) = unit.pts else {
                continue;
            };
            let cont = self.continuity.entry(unit.pid).or_insert_with(PtsContinuity::new);
            let pts = cont.adjust_pts(raw_pts);
            let dts = unit.dts.map(|d| cont.adjust_dts(d));
            let payload = prepend_parameter_sets(&unit.data, unit.keyframe, None);

            debug!(pid = unit.pid, pts, "re-muxing access unit");
            out.extend_from_slice(&mux.write_es_frame(
                unit.pid,
                unit.is_video(),
                pts,
                dts,
                &payload,
                unit.keyframe,
                Some(pts * 300),
            ));
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_ts_segment(pts: u64) -> Bytes {
        let streams = vec![MuxStream {
            pid: 0x100,
            stream_type: StreamType::H264,
        }];
        let mut muxer = TsMuxer::new(1, 0x20, 0x100, streams);
        let mut out = BytesMut::new();
        out.extend_from_slice(&muxer.write_pat_pmt());
        out.extend_from_slice(&muxer.write_es_frame(
            0x100,
            true,
            pts,
            Some(pts),
            b"idr-payload",
            true,
            Some(pts * 300),
        ));
        out.freeze()
    }

    #[tokio::test]
    async fn test_collapser_dedupes_reserved_segment_scenario_two() {
        let server = MockServer::start().await;
        let hit_count = Arc::new(AtomicUsize::new(0));

        let playlist = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:100\n\
            #EXTINF:6.0,\nsegment0.ts\n#EXTINF:6.0,\nsegment1.ts\n#EXTINF:6.0,\nsegment2.ts\n\
            #EXT-X-ENDLIST\n";
        Mock::given(method("GET"))
            .and(path("/live/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(playlist))
            .mount(&server)
            .await;

        for (name, pts) in [("segment0.ts", 0u64), ("segment1.ts", 90_000), ("segment2.ts", 180_000)] {
            let hit_count = hit_count.clone();
            Mock::given(method("GET"))
                .and(path(format!("/live/{name}")))
                .respond_with(move |_: &wiremock::Request| {
                    hit_count.fetch_add(1, Ordering::SeqCst);
                    ResponseTemplate::new(200).set_body_bytes(sample_ts_segment(pts).to_vec())
                })
                .mount(&server)
                .await;
        }

        let collapser = Arc::new(HlsCollapser::new(reqwest::Client::new(), CollapserConfig::default()));
        let url = Url::parse(&format!("{}/live/index.m3u8", server.uri())).unwrap();
        let (mut rx, outcome_rx, _handle) = collapser.start(url);

        let mut total_bytes = 0usize;
        let mut chunks = 0usize;
        while let Some(chunk) = rx.recv().await {
            total_bytes += chunk.len();
            chunks += 1;
        }
        let outcome = outcome_rx.await.unwrap();
        assert!(matches!(outcome, CollapseOutcome::Eos));
        assert_eq!(chunks, 3);
        assert!(total_bytes > 0);
        assert_eq!(hit_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_collapser_dedupes_segment_reserved_across_playlist_polls() {
        let server = MockServer::start().await;
        let poll_count = Arc::new(AtomicUsize::new(0));
        let hit_count = Arc::new(AtomicUsize::new(0));

        {
            let poll_count = poll_count.clone();
            Mock::given(method("GET"))
                .and(path("/live/index.m3u8"))
                .respond_with(move |_: &wiremock::Request| {
                    let poll = poll_count.fetch_add(1, Ordering::SeqCst);
                    let body = if poll == 0 {
                        "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:0\n\
                            #EXTINF:1.0,\nsegment0.ts\n#EXTINF:1.0,\nsegment1.ts\n"
                    } else {
                        "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:0\n\
                            #EXTINF:1.0,\nsegment0.ts\n#EXTINF:1.0,\nsegment1.ts\n\
                            #EXTINF:1.0,\nsegment2.ts\n#EXT-X-ENDLIST\n"
                    };
                    ResponseTemplate::new(200).set_body_string(body)
                })
                .mount(&server)
                .await;
        }

        for (name, pts) in [("segment0.ts", 0u64), ("segment1.ts", 90_000), ("segment2.ts", 180_000)] {
            let hit_count = hit_count.clone();
            Mock::given(method("GET"))
                .and(path(format!("/live/{name}")))
                .respond_with(move |_: &wiremock::Request| {
                    hit_count.fetch_add(1, Ordering::SeqCst);
                    ResponseTemplate::new(200).set_body_bytes(sample_ts_segment(pts).to_vec())
                })
                .mount(&server)
                .await;
        }

        let config = CollapserConfig {
            min_poll: Duration::from_millis(30),
            ..CollapserConfig::default()
        };
        let collapser = Arc::new(HlsCollapser::new(reqwest::Client::new(), config));
        let url = Url::parse(&format!("{}/live/index.m3u8", server.uri())).unwrap();
        let (mut rx, outcome_rx, _handle) = collapser.start(url);

        let mut chunks = 0usize;
        while rx.recv().await.is_some() {
            chunks += 1;
        }
        let outcome = outcome_rx.await.unwrap();
        assert!(matches!(outcome, CollapseOutcome::Eos));
        assert_eq!(chunks, 3);
        assert_eq!(hit_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_collapser_aborts_after_consecutive_playlist_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live/index.m3u8"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = CollapserConfig {
            min_poll: Duration::from_millis(10),
            segment_timeout: Duration::from_millis(200),
            max_consecutive_failures: 3,
        };
        let collapser = Arc::new(HlsCollapser::new(reqwest::Client::new(), config));
        let url = Url::parse(&format!("{}/live/index.m3u8", server.uri())).unwrap();
        let (mut rx, outcome_rx, _handle) = collapser.start(url);

        while rx.recv().await.is_some() {}
        let outcome = outcome_rx.await.unwrap();
        assert!(matches!(outcome, CollapseOutcome::Failed(CollapseError::TooManyFailures)));
    }

    #[tokio::test]
    async fn test_collapser_stop_is_honored() {
        let server = MockServer::start().await;
        let playlist = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:6.0,\nsegment0.ts\n";
        Mock::given(method("GET"))
            .and(path("/live/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(playlist))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live/segment0.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(sample_ts_segment(0).to_vec()))
            .mount(&server)
            .await;

        let config = CollapserConfig {
            min_poll: Duration::from_millis(20),
            ..CollapserConfig::default()
        };
        let collapser = Arc::new(HlsCollapser::new(reqwest::Client::new(), config));
        let url = Url::parse(&format!("{}/live/index.m3u8", server.uri())).unwrap();
        let (mut rx, outcome_rx, handle) = collapser.start(url);

        let _ = rx.recv().await;
        handle.stop().await;
        while rx.recv().await.is_some() {}
        let outcome = outcome_rx.await.unwrap();
        assert!(matches!(outcome, CollapseOutcome::Stopped));
    }
}
