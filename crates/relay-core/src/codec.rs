use media_types::{AudioCodec, VideoCodec};
use ts::pmt::StreamType;

/// Maps a demuxed TS stream type to the codec tag the ES buffer stores.
/// `None` for stream types the relay has no video codec for (audio PIDs,
/// private data, unrecognized types).
pub fn video_codec_for(stream_type: StreamType) -> Option<VideoCodec> {
    match stream_type {
        StreamType::H264 => Some(VideoCodec::H264),
        StreamType::Hevc => Some(VideoCodec::H265),
        _ => None,
    }
}

pub fn audio_codec_for(stream_type: StreamType) -> Option<AudioCodec> {
    match stream_type {
        StreamType::Aac | StreamType::LatmAac => Some(AudioCodec::Aac),
        StreamType::Ac3 => Some(AudioCodec::Ac3),
        StreamType::Eac3 => Some(AudioCodec::Eac3),
        StreamType::Mpeg1Audio | StreamType::Mpeg2Audio => Some(AudioCodec::Mp3),
        _ => None,
    }
}

/// The inverse direction, used when building a TS-mode segmenter for a
/// source variant: the codec tag the buffer already classified the track
/// as, turned back into the wire stream type so `relay_segmenter::Segmenter`
/// can packetize it the same way the ingest demuxer saw it.
pub fn video_stream_type_for(codec: VideoCodec) -> StreamType {
    match codec {
        VideoCodec::H264 => StreamType::H264,
        VideoCodec::H265 => StreamType::Hevc,
        VideoCodec::Av1 | VideoCodec::Vp9 => StreamType::Unknown(0),
    }
}

pub fn audio_stream_type_for(codec: AudioCodec) -> StreamType {
    match codec {
        AudioCodec::Aac => StreamType::Aac,
        AudioCodec::Ac3 => StreamType::Ac3,
        AudioCodec::Eac3 => StreamType::Eac3,
        AudioCodec::Mp3 => StreamType::Mpeg1Audio,
        AudioCodec::Opus => StreamType::Unknown(0),
    }
}
