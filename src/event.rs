//! Pipeline events.
//!
//! These surface state changes and results to whatever front end embeds
//! the pipeline, without depending on any UI framework.

use sotto_core::SessionPhase;

/// Events emitted by the transcription pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The session phase has changed
    PhaseChanged(SessionPhase),
    /// Coalesced preview of the transcript so far
    PreviewDelta(String),
    /// Final transcription text
    TranscriptReady(String),
    /// A transcription failed; user-facing message
    Failed(String),
}
