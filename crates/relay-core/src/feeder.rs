use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_es::{EsVariant, TrackKind};
use relay_segmenter::Segmenter;
use tracing::debug;

const FEED_POLL_INTERVAL: Duration = Duration::from_millis(200);
const FEED_BATCH_LIMIT: usize = 128;

/// Drains newly written samples out of an ES variant and pushes them into
/// a segmenter, cutting new HLS/DASH segments as they accumulate.
///
/// Polls rather than waiting on `EsTrack`'s per-write `Notify`, since a
/// writer can fire `notify_waiters` between this loop reading the queue
/// and resubscribing; a short poll interval is simpler than a
/// subscribe-then-recheck dance and costs nothing a live stream would
/// notice against a 200ms segment duration.
pub fn spawn(variant: Arc<EsVariant>, processor: Arc<Mutex<Segmenter>>) {
    tokio::spawn(async move {
        let mut video_seq = 0u64;
        let mut audio_seq = 0u64;

        loop {
            if variant.is_closed() {
                debug!("segmenter feeder stopping: variant closed");
                return;
            }

            let video_samples = variant.read_from(TrackKind::Video, video_seq, FEED_BATCH_LIMIT);
            let audio_samples = variant.read_from(TrackKind::Audio, audio_seq, FEED_BATCH_LIMIT);

            if !video_samples.is_empty() || !audio_samples.is_empty() {
                let mut segmenter = processor.lock();
                for sample in video_samples {
                    video_seq = sample.seq;
                    segmenter.push_video(sample);
                }
                for sample in audio_samples {
                    audio_seq = sample.seq;
                    segmenter.push_audio(sample);
                }
            }

            tokio::time::sleep(FEED_POLL_INTERVAL).await;
        }
    });
}
