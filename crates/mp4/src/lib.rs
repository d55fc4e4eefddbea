//! Minimal ISOBMFF (ISO Base Media File Format) helpers for fMP4 init and
//! media segments: box-level reading, codec detection, and box writing.

pub mod box_utils;
pub mod isobmff;
pub mod write;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use isobmff::{parse_init_segment, InitSegmentInfo};
pub use write::{
    build_init_segment, build_media_segment, AudioTrackInit, TrackInit, TrackSample,
    VideoTrackInit, SAMPLE_FLAG_NON_SYNC,
};
