use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The relay's error-kind taxonomy, mapped to HTTP responses at the edge.
/// Grounded on `rust-srec::api::error::ApiError`'s status-plus-JSON-body
/// shape.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream returned a transient failure: {0}")]
    UpstreamTransient(String),
    #[error("upstream returned a fatal failure: {0}")]
    UpstreamFatal(String),
    #[error("no capacity available")]
    CapacityExhausted,
    #[error("segment not found")]
    SegmentNotFound,
    #[error("not enough segments yet")]
    SourceTooEarly { retry_after: std::time::Duration },
    #[error("buffer closed")]
    BufferClosed,
    #[error("unknown codec variant")]
    VariantNotFound,
    #[error("channel has no source variant yet")]
    NoSourceVariant,
    #[error("circuit open for this endpoint")]
    CircuitOpen,
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl RelayError {
    fn code(&self) -> &'static str {
        match self {
            RelayError::UpstreamTransient(_) => "UPSTREAM_TRANSIENT",
            RelayError::UpstreamFatal(_) => "UPSTREAM_FATAL",
            RelayError::CapacityExhausted => "CAPACITY_EXHAUSTED",
            RelayError::SegmentNotFound => "SEGMENT_NOT_FOUND",
            RelayError::SourceTooEarly { .. } => "SOURCE_TOO_EARLY",
            RelayError::BufferClosed => "BUFFER_CLOSED",
            RelayError::VariantNotFound => "VARIANT_NOT_FOUND",
            RelayError::NoSourceVariant => "NO_SOURCE_VARIANT",
            RelayError::CircuitOpen => "CIRCUIT_OPEN",
            RelayError::BadRequest(_) => "BAD_REQUEST",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RelayError::UpstreamTransient(_) => StatusCode::BAD_GATEWAY,
            RelayError::UpstreamFatal(_) => StatusCode::BAD_GATEWAY,
            RelayError::CapacityExhausted => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::SegmentNotFound => StatusCode::NOT_FOUND,
            RelayError::SourceTooEarly { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::BufferClosed => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::VariantNotFound => StatusCode::NOT_FOUND,
            RelayError::NoSourceVariant => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            RelayError::SourceTooEarly { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, secs.to_string().parse().expect("digits are valid header value"));
        }
        response
    }
}

impl From<relay_es::EsError> for RelayError {
    fn from(err: relay_es::EsError) -> Self {
        match err {
            relay_es::EsError::NoSource => RelayError::NoSourceVariant,
        }
    }
}

impl From<relay_segmenter::SegmenterError> for RelayError {
    fn from(err: relay_segmenter::SegmenterError) -> Self {
        match err {
            relay_segmenter::SegmenterError::SegmentNotFound(_) => RelayError::SegmentNotFound,
            relay_segmenter::SegmenterError::TooEarly => RelayError::SourceTooEarly {
                retry_after: std::time::Duration::from_secs(1),
            },
            relay_segmenter::SegmenterError::NotReady => RelayError::SourceTooEarly {
                retry_after: std::time::Duration::from_secs(1),
            },
        }
    }
}

impl From<relay_passthrough::PassthroughError> for RelayError {
    fn from(err: relay_passthrough::PassthroughError) -> Self {
        match err {
            relay_passthrough::PassthroughError::SegmentNotFound => RelayError::SegmentNotFound,
            relay_passthrough::PassthroughError::Upstream(message) => RelayError::UpstreamTransient(message),
        }
    }
}
