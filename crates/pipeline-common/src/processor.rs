//! The `Processor<T>` trait: one stage in a pipeline.

use std::sync::Arc;

use crate::{PipelineError, StreamerContext};

/// A single stage in a processing pipeline.
///
/// Implementors receive items of type `T`, optionally transform or split
/// them, and push zero or more results downstream via `output`. `finish` is
/// called once after the last input item to flush any buffered state (e.g.
/// a collapse window holding a partial segment).
pub trait Processor<T>: Send {
    /// A short, stable name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Process one input item, pushing results downstream via `output`.
    fn process(
        &mut self,
        context: &Arc<StreamerContext>,
        input: T,
        output: &mut dyn FnMut(T) -> Result<(), PipelineError>,
    ) -> Result<(), PipelineError>;

    /// Flush any buffered state after the last input item has been processed.
    fn finish(
        &mut self,
        context: &Arc<StreamerContext>,
        output: &mut dyn FnMut(T) -> Result<(), PipelineError>,
    ) -> Result<(), PipelineError>;
}
