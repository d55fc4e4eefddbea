use bytes::{BufMut, Bytes, BytesMut};
use relay_es::EsSample;
use ts::mux::{MuxStream, TsMuxer};
use ts::pmt::StreamType;

/// Drives a [`TsMuxer`] across one segment at a time: PAT/PMT is rewritten
/// at the start of every segment so a decoder tuning into any segment can
/// acquire the program immediately.
pub struct TsEncoder {
    muxer: TsMuxer,
    video_pid: u16,
    audio_pid: Option<u16>,
}

impl TsEncoder {
    pub fn new(video_stream_type: StreamType, audio_stream_type: Option<StreamType>) -> Self {
        let video_pid = 0x0100;
        let audio_pid = audio_stream_type.is_some().then_some(0x0101);
        let pmt_pid = 0x1000;

        let mut streams = vec![MuxStream {
            pid: video_pid,
            stream_type: video_stream_type,
        }];
        if let (Some(pid), Some(stream_type)) = (audio_pid, audio_stream_type) {
            streams.push(MuxStream { pid, stream_type });
        }

        let muxer = TsMuxer::new(1, pmt_pid, video_pid, streams);
        Self {
            muxer,
            video_pid,
            audio_pid,
        }
    }

    /// Mux one segment's worth of already-continuity-adjusted samples into a
    /// single combined byte run, starting with a fresh PAT/PMT.
    pub fn encode_segment(&mut self, video: &[EsSample], audio: &[EsSample]) -> Bytes {
        let mut out = BytesMut::new();
        out.put(self.muxer.write_pat_pmt());

        let mut video_iter = video.iter().peekable();
        let mut audio_iter = audio.iter().peekable();

        loop {
            let take_video = match (video_iter.peek(), audio_iter.peek()) {
                (Some(v), Some(a)) => v.dts <= a.pts,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            if take_video {
                let sample = video_iter.next().unwrap();
                // video always carries PCR in this single-program layout.
                out.put(self.muxer.write_es_frame(
                    self.video_pid,
                    true,
                    sample.pts,
                    Some(sample.dts),
                    &sample.data,
                    sample.keyframe,
                    Some(sample.dts * 300),
                ));
            } else {
                let sample = audio_iter.next().unwrap();
                let Some(audio_pid) = self.audio_pid else {
                    continue;
                };
                out.put(self.muxer.write_es_frame(
                    audio_pid,
                    false,
                    sample.pts,
                    Some(sample.pts),
                    &sample.data,
                    false,
                    None,
                ));
            }
        }

        out.freeze()
    }
}
