//! The pipeline stage contract.
//!
//! The transmuxer is a directed acyclic graph of stages. Each stage accepts
//! typed input via [`Stage::push`] and appends any number of typed outputs to
//! the vector supplied by its caller; the graph's edges are the explicit
//! method calls made by the owner of both stages. Processing is synchronous
//! and single-threaded: a `push` at the head of the pipeline runs every
//! downstream stage to completion before returning.

/// A processing stage in the transmux pipeline.
///
/// Lifecycle signals:
///
/// - [`flush`](Stage::flush): emit everything buffered; state that anchors
///   the next segment (timestamp references, cached configuration) survives.
/// - [`partial_flush`](Stage::partial_flush): emit what is safely complete
///   while retaining in-flight data (for example a possibly-unfinished
///   trailing video frame).
/// - [`end_timeline`](Stage::end_timeline): flush and mark a timeline
///   boundary.
/// - [`reset`](Stage::reset): discard all buffered state. Calling `reset`
///   twice in a row leaves the stage in the same state as calling it once.
pub trait Stage {
    /// The event type this stage consumes.
    type Input;
    /// The event type this stage produces.
    type Output;

    /// Processes one input event, appending outputs to `out`.
    fn push(&mut self, input: Self::Input, out: &mut Vec<Self::Output>);

    /// Emits buffered data and prepares for the next segment.
    fn flush(&mut self, out: &mut Vec<Self::Output>);

    /// Emits what is complete, keeping partial state buffered.
    fn partial_flush(&mut self, out: &mut Vec<Self::Output>) {
        self.flush(out);
    }

    /// Flushes and marks the end of the current timeline.
    fn end_timeline(&mut self, out: &mut Vec<Self::Output>) {
        self.flush(out);
    }

    /// Discards all buffered state.
    fn reset(&mut self);
}
