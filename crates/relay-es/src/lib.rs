//! Shared elementary-stream buffer: one source variant per channel produced
//! by ingest, any number of derived (transcoded) variants, each holding a
//! ring-buffered video and audio track with paired byte/duration-cap
//! eviction and a consumer registry.
//!
//! Grounded on `mesio::hls::buffer_pool`'s pooled-allocation idiom
//! (bounded resource, atomic counters, a `*Stats`-style snapshot) and
//! `pipeline-common::channel_pipeline`'s single-slot notification pattern,
//! generalized here to multiple concurrent readers per track via
//! `tokio::sync::Notify::notify_waiters`.

mod buffer;
mod error;
mod sample;
mod track;
mod variant;

pub use buffer::{SharedEsBuffer, VariantRequest};
pub use error::EsError;
pub use sample::{AudioCodec, EsSample, TrackKind, VariantKey, VideoCodec};
pub use track::{CodecInfo, EsTrack};
pub use variant::{ConsumerPosition, EsVariant, DEFAULT_BYTE_CAP, DEFAULT_DURATION_CAP_TICKS};
