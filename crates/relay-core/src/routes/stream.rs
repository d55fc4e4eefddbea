use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use relay_es::VariantRequest;
use relay_passthrough::{DashUpstream, Upstream};
use relay_segmenter::{Segmenter, SegmenterConfig};
use relay_session::ProcessorKey;
use serde::Deserialize;
use tokio::sync::broadcast;
use ts::mux::{MuxStream, TsMuxer};
use url::Url;

const MPEGTS_VIDEO_PID: u16 = 0x0100;
const MPEGTS_AUDIO_PID: u16 = 0x0101;
const MPEGTS_PMT_PID: u16 = 0x1000;

use crate::codec::{audio_stream_type_for, video_stream_type_for};
use crate::error::RelayError;
use crate::feeder;
use crate::ingest::{self, ChannelRoute};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub format: String,
    pub seg: Option<u64>,
    /// Presence (not value) means "serve the init segment" — the
    /// passthrough cache's rewritten manifest URLs carry a literal
    /// `init=1`, not a `true`/`false` flag `bool` would require.
    pub init: Option<String>,
    pub track: Option<String>,
}

pub async fn stream_handler(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, RelayError> {
    let route = ingest::ensure_started(&state, &channel_id).await?;
    if let Some(session) = state.sessions.get(&channel_id) {
        session.touch();
    }

    match query.format.as_str() {
        "mpegts" => serve_mpegts(&state, &channel_id).await,
        "hls" => serve_hls(&state, &channel_id, &route, query.seg).await,
        "dash" => serve_dash(&state, &channel_id, &route, &query).await,
        other => Err(RelayError::BadRequest(format!("unsupported format '{other}'"))),
    }
}

async fn next_tap_chunk(rx: &mut broadcast::Receiver<Bytes>) -> Option<Bytes> {
    loop {
        match rx.recv().await {
            Ok(bytes) => return Some(bytes),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Builds the channel's PAT/PMT/null/null prefix from its source variant's
/// classified codecs. `?format=mpegts` is a raw passthrough of the
/// upstream's own bytes past this point; a client joining mid-stream needs
/// this prefix since the tap itself never replays the upstream's own PAT/PMT.
fn initial_tables_for(state: &AppState, channel_id: &str) -> Result<Bytes, RelayError> {
    let session = state.sessions.get(channel_id).ok_or(RelayError::NoSourceVariant)?;
    let (video, audio) = session.buffer().pending_codecs();
    let video = video.ok_or(RelayError::NoSourceVariant)?;

    let mut streams = vec![MuxStream {
        pid: MPEGTS_VIDEO_PID,
        stream_type: video_stream_type_for(video),
    }];
    if let Some(audio) = audio {
        streams.push(MuxStream {
            pid: MPEGTS_AUDIO_PID,
            stream_type: audio_stream_type_for(audio),
        });
    }

    let mut muxer = TsMuxer::new(1, MPEGTS_PMT_PID, MPEGTS_VIDEO_PID, streams);
    Ok(muxer.initial_tables())
}

async fn serve_mpegts(state: &AppState, channel_id: &str) -> Result<Response, RelayError> {
    let rx = state
        .ingest
        .raw_ts_tap(channel_id)
        .ok_or(RelayError::NoSourceVariant)?;
    let prefix = initial_tables_for(state, channel_id)?;

    let tail = futures::stream::unfold(rx, |mut rx| async move {
        next_tap_chunk(&mut rx).await.map(|bytes| (Ok::<Bytes, std::io::Error>(bytes), rx))
    });
    let stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(prefix) }).chain(tail);

    let body = Body::from_stream(stream);
    let response = Response::builder()
        .header(header::CONTENT_TYPE, "video/mp2t")
        .body(body)
        .expect("static headers are always valid");
    Ok(response)
}

/// Serves the rolling-window TS segmenter for an ES-backed channel's
/// source codec variant. Transcoded variants and fMP4 packaging for
/// ES-backed channels are not wired up yet (see DESIGN.md); only the
/// untouched source codec in TS-mode HLS is supported here.
async fn serve_hls(
    state: &AppState,
    channel_id: &str,
    route: &Arc<ChannelRoute>,
    seg: Option<u64>,
) -> Result<Response, RelayError> {
    match route.as_ref() {
        ChannelRoute::EsBacked => {
            let processor = ensure_ts_processor(state, channel_id).await?;
            let segmenter = processor.lock();
            if let Some(seq) = seg {
                let segment = segmenter.get_segment(seq)?;
                Ok(ts_response(segment.bytes))
            } else {
                let playlist = segmenter.hls_playlist(channel_id);
                Ok(playlist_response(playlist))
            }
        }
        ChannelRoute::Hls(cache) => {
            let upstream: Arc<dyn Upstream> = state.upstream.clone();
            let upstream_url = state
                .ingest
                .upstream_for(channel_id)
                .ok_or_else(|| RelayError::BadRequest(format!("channel {channel_id} is not registered")))?;
            let proxy_base = proxy_base_url(state, channel_id, "hls")?;

            if let Some(index) = seg {
                let bytes = cache.serve_segment(&upstream, index as usize).await?;
                Ok(ts_response(bytes))
            } else {
                let bytes = cache.serve_playlist(&upstream, &upstream_url, &proxy_base).await?;
                Ok(playlist_response(String::from_utf8_lossy(&bytes).into_owned()))
            }
        }
        ChannelRoute::Dash(_) => Err(RelayError::BadRequest(
            "channel upstream is DASH; request format=dash".to_string(),
        )),
    }
}

async fn serve_dash(
    state: &AppState,
    channel_id: &str,
    route: &Arc<ChannelRoute>,
    query: &StreamQuery,
) -> Result<Response, RelayError> {
    match route.as_ref() {
        ChannelRoute::EsBacked => Err(RelayError::BadRequest(
            "DASH packaging for an ES-backed channel is not supported".to_string(),
        )),
        ChannelRoute::Dash(cache) => {
            let upstream: Arc<dyn DashUpstream> = state.upstream.clone();
            let upstream_url = state
                .ingest
                .upstream_for(channel_id)
                .ok_or_else(|| RelayError::BadRequest(format!("channel {channel_id} is not registered")))?;

            if query.init.is_some() {
                let track = query
                    .track
                    .as_deref()
                    .ok_or_else(|| RelayError::BadRequest("format=dash&init=1 requires track".to_string()))?;
                let bytes = cache.serve_init_segment(&upstream, track).await?;
                Ok(mp4_response(bytes))
            } else if let Some(index) = query.seg {
                let track = query
                    .track
                    .as_deref()
                    .ok_or_else(|| RelayError::BadRequest("format=dash&seg requires track".to_string()))?;
                let bytes = cache.serve_segment(&upstream, track, index as usize).await?;
                Ok(mp4_response(bytes))
            } else {
                let proxy_base = proxy_base_url(state, channel_id, "dash")?;
                let bytes = cache.serve_manifest(&upstream, &upstream_url, &proxy_base).await?;
                Ok(manifest_response(String::from_utf8_lossy(&bytes).into_owned()))
            }
        }
        ChannelRoute::Hls(_) => Err(RelayError::BadRequest(
            "channel upstream is HLS; request format=hls".to_string(),
        )),
    }
}

/// Gets or lazily builds the TS-mode segmenter for a channel's source
/// codec variant, spawning its feeder task the first time it's built.
async fn ensure_ts_processor(
    state: &AppState,
    channel_id: &str,
) -> Result<Arc<parking_lot::Mutex<Segmenter>>, RelayError> {
    let session = state.sessions.get_or_create(channel_id);
    let buffer = session.buffer().clone();
    let variant = buffer.get_or_create_variant(VariantRequest::Copy, |_src, _tgt| {}).await?;
    let variant_key = buffer.source_key().ok_or(RelayError::NoSourceVariant)?;
    let key = ProcessorKey::new(variant_key, false);

    if let Some(processor) = session.get_processor(key) {
        return Ok(processor);
    }

    let config = SegmenterConfig::new(state.config.segment_target_duration, state.config.segment_window, false);
    let video_stream_type = video_stream_type_for(variant_key.video);
    let audio_stream_type = audio_stream_type_for(variant_key.audio);
    let processor = session.get_or_create_processor(key, || {
        Segmenter::new_ts(config, 90_000, video_stream_type, Some(audio_stream_type))
    });

    feeder::spawn(variant, processor.clone());

    Ok(processor)
}

fn proxy_base_url(state: &AppState, channel_id: &str, format: &str) -> Result<Url, RelayError> {
    let mut url = Url::parse(&state.config.public_base_url)
        .map_err(|err| RelayError::BadRequest(format!("invalid public_base_url: {err}")))?;
    url.set_path(&format!("/stream/{channel_id}"));
    url.set_query(Some(&format!("format={format}")));
    Ok(url)
}

fn ts_response(bytes: Bytes) -> Response {
    (
        [(header::CONTENT_TYPE, "video/mp2t")],
        bytes,
    )
        .into_response()
}

fn mp4_response(bytes: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "video/mp4")], bytes).into_response()
}

fn playlist_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")], body).into_response()
}

fn manifest_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/dash+xml")], body).into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use futures::StreamExt;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use relay_es::{AudioCodec, VideoCodec};

    use crate::config::RelayConfig;
    use crate::ingest;
    use crate::routes::build_router;
    use crate::state::AppState;

    const TS_PACKET_SIZE: usize = 188;

    fn packet_pid(packet: &[u8]) -> u16 {
        ((packet[1] as u16 & 0x1F) << 8) | packet[2] as u16
    }

    /// Asserts `prefix` is exactly four 188-byte packets shaped like
    /// `initial_tables_for`'s output: PAT, PMT, then two null (0x1FFF)
    /// packets.
    fn assert_is_initial_tables_prefix(prefix: &[u8]) {
        assert_eq!(prefix.len(), TS_PACKET_SIZE * 4);
        let packets: Vec<&[u8]> = prefix.chunks(TS_PACKET_SIZE).collect();
        for packet in &packets {
            assert_eq!(packet[0], 0x47, "every packet starts with the TS sync byte");
        }
        assert_eq!(packet_pid(packets[0]), 0x0000, "first packet is the PAT");
        assert_eq!(packet_pid(packets[1]), super::MPEGTS_PMT_PID, "second packet is the PMT");
        assert_eq!(packet_pid(packets[2]), 0x1FFF, "third packet is a null packet");
        assert_eq!(packet_pid(packets[3]), 0x1FFF, "fourth packet is a null packet");
    }

    const DASH_MANIFEST: &str = r#"<?xml version="1.0"?>
<MPD>
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="v0">
        <SegmentList>
          <Initialization sourceURL="init-v0.m4s"/>
          <SegmentURL media="seg-v0-0.m4s"/>
        </SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    // Scenario 1 (raw-TS passthrough): client GETs `?format=mpegts`
    // and receives the upstream bytes untouched, via the channel's
    // broadcast tap.
    #[tokio::test]
    async fn raw_ts_passthrough_forwards_upstream_bytes() {
        let server = MockServer::start().await;
        let ts_bytes = vec![0x47u8; 188 * 4];
        Mock::given(method("GET"))
            .and(path("/live/ch.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(ts_bytes.clone()))
            .mount(&server)
            .await;

        let state = AppState::new(RelayConfig::default());
        let upstream_url = url::Url::parse(&format!("{}/live/ch.ts", server.uri())).unwrap();
        state.ingest.register_channel("ch1", upstream_url);

        ingest::ensure_started(&state, "ch1").await.unwrap();
        // Let the spawned ingest task reach `raw_ts_sender` before a
        // client subscribes; see DESIGN.md on this known race.
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The mock upstream's body is sync-byte padding, not a demuxable
        // TS program, so classification never runs on it; seed the codecs
        // directly to exercise the synthesized prefix.
        let session = state.sessions.get_or_create("ch1");
        session.buffer().set_video_codec(VideoCodec::H264, bytes::Bytes::new());
        session.buffer().set_audio_codec(AudioCodec::Aac, bytes::Bytes::new());

        let app = build_router(state);
        let request = HttpRequest::builder()
            .uri("/stream/ch1?format=mpegts")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut stream = response.into_body().into_data_stream();
        let first_chunk = tokio::time::timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("tap should deliver upstream bytes before the timeout")
            .expect("stream should yield at least one chunk")
            .unwrap();
        assert_is_initial_tables_prefix(&first_chunk);

        let second_chunk = tokio::time::timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("tap should deliver upstream bytes before the timeout")
            .expect("stream should yield a second chunk")
            .unwrap();
        assert_eq!(second_chunk.as_ref(), ts_bytes.as_slice());
    }

    // Scenario 1's "disconnecting a client does not affect others":
    // two independent HTTP clients tap the same broadcast, and dropping
    // one doesn't stop the other from receiving subsequent bytes.
    #[tokio::test]
    async fn raw_ts_tap_is_independent_per_client() {
        let server = MockServer::start().await;
        let ts_bytes = vec![0x47u8; 188 * 4];
        Mock::given(method("GET"))
            .and(path("/live/ch.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(ts_bytes.clone()))
            .mount(&server)
            .await;

        let state = AppState::new(RelayConfig::default());
        let upstream_url = url::Url::parse(&format!("{}/live/ch.ts", server.uri())).unwrap();
        state.ingest.register_channel("ch1", upstream_url);
        ingest::ensure_started(&state, "ch1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = state.sessions.get_or_create("ch1");
        session.buffer().set_video_codec(VideoCodec::H264, bytes::Bytes::new());
        session.buffer().set_audio_codec(AudioCodec::Aac, bytes::Bytes::new());

        let app = build_router(state);
        let request_a = HttpRequest::builder()
            .uri("/stream/ch1?format=mpegts")
            .body(Body::empty())
            .unwrap();
        let response_a = app.clone().oneshot(request_a).await.unwrap();
        let mut stream_a = response_a.into_body().into_data_stream();
        let chunk_a = tokio::time::timeout(Duration::from_millis(500), stream_a.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_is_initial_tables_prefix(&chunk_a);
        drop(stream_a);

        let request_b = HttpRequest::builder()
            .uri("/stream/ch1?format=mpegts")
            .body(Body::empty())
            .unwrap();
        let response_b = app.oneshot(request_b).await.unwrap();
        assert_eq!(response_b.status(), StatusCode::OK);
    }

    // Scenario 4 (DASH passthrough): client GETs `?format=dash` and
    // gets back a manifest with init/segment URLs rewritten to this
    // proxy; a follow-up `init=1&track=<id>` resolves to the upstream
    // init segment, and an unknown track 404s.
    #[tokio::test]
    async fn dash_passthrough_rewrites_and_resolves_scenario_four() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/live/manifest.mpd"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live/manifest.mpd"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DASH_MANIFEST))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live/init-v0.m4s"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"init-bytes".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live/seg-v0-0.m4s"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"seg-bytes".to_vec()))
            .mount(&server)
            .await;

        let state = AppState::new(RelayConfig::default());
        let upstream_url = url::Url::parse(&format!("{}/live/manifest.mpd", server.uri())).unwrap();
        state.ingest.register_channel("ch2", upstream_url);

        let app = build_router(state);

        let manifest_request = HttpRequest::builder()
            .uri("/stream/ch2?format=dash")
            .body(Body::empty())
            .unwrap();
        let manifest_response = app.clone().oneshot(manifest_request).await.unwrap();
        assert_eq!(manifest_response.status(), StatusCode::OK);
        let manifest_bytes = axum::body::to_bytes(manifest_response.into_body(), usize::MAX).await.unwrap();
        let manifest_text = String::from_utf8(manifest_bytes.to_vec()).unwrap();
        assert!(manifest_text.contains("<MPD>"));
        assert!(manifest_text.contains("format=dash&init=1&track=t1"));
        assert!(manifest_text.contains("format=dash&seg=0&track=t1"));

        let init_request = HttpRequest::builder()
            .uri("/stream/ch2?format=dash&init=1&track=t1")
            .body(Body::empty())
            .unwrap();
        let init_response = app.clone().oneshot(init_request).await.unwrap();
        assert_eq!(init_response.status(), StatusCode::OK);
        let init_bytes = axum::body::to_bytes(init_response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(init_bytes.as_ref(), b"init-bytes");

        let bad_track_request = HttpRequest::builder()
            .uri("/stream/ch2?format=dash&seg=0&track=missing")
            .body(Body::empty())
            .unwrap();
        let bad_track_response = app.oneshot(bad_track_request).await.unwrap();
        assert_eq!(bad_track_response.status(), StatusCode::NOT_FOUND);
    }
}
