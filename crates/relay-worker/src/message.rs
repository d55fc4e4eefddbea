use std::collections::HashMap;
use std::time::Duration;

use relay_es::{EsSample, TrackKind};
use relay_scheduler::HwHint;

/// Output container the worker should mux its encoded samples into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Fmp4,
    Mpegts,
}

#[derive(Debug, Clone)]
pub struct StartPayload {
    pub job_id: String,
    pub session_id: String,
    pub channel_id: String,
    pub source_codec: String,
    pub target_codec: String,
    pub bitrates: Vec<u32>,
    pub preset: String,
    pub hw_hint: HwHint,
    pub encoder_overrides: HashMap<String, String>,
    pub container: Container,
}

#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub job_id: String,
    pub track: TrackKind,
    pub samples: Vec<EsSample>,
}

#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub job_id: String,
    pub frames_encoded: u64,
    pub encode_fps: f32,
    /// Set when the worker fell back off the hardware encoder it was
    /// assigned, so the caller can reclassify the job on its scheduler.
    pub actual_job_type: Option<relay_scheduler::JobType>,
}

#[derive(Debug, Clone)]
pub struct ProbeRequestPayload {
    /// The stream URL; also the pending-map routing key.
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ProbeInfo {
    pub container: String,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ProbeResponsePayload {
    pub url: String,
    pub outcome: Result<ProbeInfo, String>,
}

/// One bidirectional RPC message. `Start`/`Stop`/`ProbeRequest` flow
/// relay-to-worker; `InputComplete`/`Samples`/`Stats`/`ProbeResponse` flow
/// worker-to-relay, all multiplexed on the same stream.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Start(StartPayload),
    Stop { job_id: String },
    InputComplete { job_id: String },
    Samples(SampleBatch),
    Stats(WorkerStats),
    ProbeRequest(ProbeRequestPayload),
    ProbeResponse(ProbeResponsePayload),
}
