use bytes::Bytes;

/// One 29.97fps frame period in 90kHz ticks. The source being mirrored here
/// subtracts exactly this value on every detected discontinuity regardless
/// of the stream's actual frame rate; kept literal rather than derived.
const ONE_FRAME_PERIOD_TICKS: i64 = 3003;
const DISCONTINUITY_GAP_TICKS: i64 = 10 * 90_000;

/// Smooths PTS/DTS across playlist restarts and upstream discontinuities
/// for variants that re-mux rather than pass through untouched.
pub struct PtsContinuity {
    last_output_pts: Option<i64>,
    offset: i64,
}

impl PtsContinuity {
    pub fn new() -> Self {
        Self {
            last_output_pts: None,
            offset: 0,
        }
    }

    /// Maps a raw PTS onto the continuous output timeline, updating the
    /// offset if this sample looks discontinuous with the last one.
    pub fn adjust_pts(&mut self, raw_pts: u64) -> u64 {
        let raw = raw_pts as i64;
        let candidate = raw - self.offset;

        if let Some(last) = self.last_output_pts {
            let discontinuous = candidate < last || candidate > last + DISCONTINUITY_GAP_TICKS;
            if discontinuous {
                self.offset = raw - last - ONE_FRAME_PERIOD_TICKS;
            }
        }

        let output = (raw - self.offset).max(0);
        self.last_output_pts = Some(output);
        output as u64
    }

    /// DTS rides the same offset established by the PTS stream; it never
    /// drives discontinuity detection on its own.
    pub fn adjust_dts(&self, raw_dts: u64) -> u64 {
        (raw_dts as i64 - self.offset).max(0) as u64
    }
}

impl Default for PtsContinuity {
    fn default() -> Self {
        Self::new()
    }
}

/// Prepends codec parameter sets to a keyframe's payload so a decoder that
/// tunes in (or resyncs after a discontinuity) has SPS/PPS (H.264) or
/// VPS/SPS/PPS (H.265) without waiting for the next one carried in-band.
/// A no-op when no parameter sets are known for the active codec yet.
pub fn prepend_parameter_sets(payload: &[u8], keyframe: bool, init_data: Option<&Bytes>) -> Bytes {
    match (keyframe, init_data) {
        (true, Some(params)) if !params.is_empty() => {
            let mut out = Vec::with_capacity(params.len() + payload.len());
            out.extend_from_slice(params);
            out.extend_from_slice(payload);
            Bytes::from(out)
        }
        _ => Bytes::copy_from_slice(payload),
    }
}
