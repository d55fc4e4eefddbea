//! # Pipeline Common
//!
//! This crate provides common abstractions for building media processing pipelines.
//! It defines generic traits and implementations that can be used across different
//! types of media processors, including FLV and HLS streams.
//!
//! ## Features
//!
//! - Generic `Processor<T>` trait for processing any type of data
//! - Generic `Pipeline<T>` implementation for chaining processors
//! - Common error types and context sharing utilities
//!
//! ## License
//!
//! MIT License
//!
//! ## Authors
//!
//! - hua0512
//!

use std::sync::Arc;

use thiserror::Error;

pub mod cancellation;
pub mod channel_pipeline;
mod context;
pub mod pipeline;
pub mod processor;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Re-export key traits and types
pub use cancellation::CancellationToken;
pub use channel_pipeline::ChannelPipeline;
pub use context::StreamerContext;
pub use pipeline::Pipeline;
pub use processor::Processor;

/// Common error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("{0}")]
    Strategy(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Stage process failed ({stage}): {source}")]
    StageProcess {
        stage: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Stage finish failed ({stage}): {source}")]
    StageFinish {
        stage: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub trait PipelineProvider: Send + 'static {
    type Item: Send + 'static;
    type Config: Send + 'static;

    fn with_config(context: Arc<StreamerContext>, config: Self::Config) -> Self;

    fn build_pipeline(&self) -> ChannelPipeline<Self::Item>;
}
