use std::fmt;
use std::str::FromStr;

/// Video resolution information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    #[inline]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Video codecs recognized by the relay. Closed set — an unrecognized codec
/// is a classification failure, not a new variant to thread through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
    Vp9,
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Av1 => "av1",
            VideoCodec::Vp9 => "vp9",
        };
        f.write_str(s)
    }
}

impl FromStr for VideoCodec {
    type Err = UnknownCodec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h264" | "avc" | "avc1" | "avc3" => Ok(VideoCodec::H264),
            "h265" | "hevc" | "hvc1" | "hev1" => Ok(VideoCodec::H265),
            "av1" | "av01" => Ok(VideoCodec::Av1),
            "vp9" | "vp09" => Ok(VideoCodec::Vp9),
            other => Err(UnknownCodec(other.to_string())),
        }
    }
}

/// Audio codecs recognized by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Aac,
    Ac3,
    Eac3,
    Mp3,
    Opus,
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Ac3 => "ac3",
            AudioCodec::Eac3 => "eac3",
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Opus => "opus",
        };
        f.write_str(s)
    }
}

impl FromStr for AudioCodec {
    type Err = UnknownCodec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aac" | "mp4a" => Ok(AudioCodec::Aac),
            "ac3" | "ac-3" => Ok(AudioCodec::Ac3),
            "eac3" | "ec-3" => Ok(AudioCodec::Eac3),
            "mp3" => Ok(AudioCodec::Mp3),
            "opus" => Ok(AudioCodec::Opus),
            other => Err(UnknownCodec(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCodec(pub String);

impl fmt::Display for UnknownCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown codec: {}", self.0)
    }
}

impl std::error::Error for UnknownCodec {}

/// A video/audio codec pairing, the unit a variant is keyed by.
///
/// Either side may be absent (audio-only or video-only streams).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecVariant {
    pub video: Option<VideoCodec>,
    pub audio: Option<AudioCodec>,
}

impl CodecVariant {
    pub fn new(video: Option<VideoCodec>, audio: Option<AudioCodec>) -> Self {
        Self { video, audio }
    }
}

impl fmt::Display for CodecVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.video, self.audio) {
            (Some(v), Some(a)) => write!(f, "{v}/{a}"),
            (Some(v), None) => write!(f, "{v}"),
            (None, Some(a)) => write!(f, "{a}"),
            (None, None) => write!(f, "none"),
        }
    }
}

impl FromStr for CodecVariant {
    type Err = UnknownCodec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((v, a)) => Ok(CodecVariant::new(
                Some(VideoCodec::from_str(v)?),
                Some(AudioCodec::from_str(a)?),
            )),
            None => {
                if let Ok(v) = VideoCodec::from_str(s) {
                    Ok(CodecVariant::new(Some(v), None))
                } else {
                    Ok(CodecVariant::new(None, Some(AudioCodec::from_str(s)?)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_display() {
        let r = Resolution::new(1920, 1080);
        assert_eq!(r.to_string(), "1920x1080");
    }

    #[test]
    fn test_resolution_equality() {
        assert_eq!(Resolution::new(1, 2), Resolution::new(1, 2));
        assert_ne!(Resolution::new(1, 2), Resolution::new(2, 1));
    }

    #[test]
    fn test_codec_variant_display_and_parse() {
        let v = CodecVariant::new(Some(VideoCodec::H264), Some(AudioCodec::Aac));
        assert_eq!(v.to_string(), "h264/aac");
        assert_eq!(CodecVariant::from_str("h264/aac").unwrap(), v);
    }

    #[test]
    fn test_codec_variant_audio_only() {
        let v = CodecVariant::from_str("opus").unwrap();
        assert_eq!(v, CodecVariant::new(None, Some(AudioCodec::Opus)));
    }

    #[test]
    fn test_codec_from_str_aliases() {
        assert_eq!(VideoCodec::from_str("avc1").unwrap(), VideoCodec::H264);
        assert_eq!(VideoCodec::from_str("hvc1").unwrap(), VideoCodec::H265);
        assert!(VideoCodec::from_str("bogus").is_err());
    }
}
