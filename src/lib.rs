// Re-export from sub-crates
pub use sotto_audio::{
    AudioMeterSample, MeterCallback, Recorder, RecorderError, Recording, RecordingHandle,
    SilenceVoiceActivityDetector,
};
pub use sotto_core::{
    APP_NAME, APP_NAME_PRETTY, Config, ConfigManager, DEFAULT_LOG_LEVEL, SessionPhase,
    SilenceDetectorConfig, StopTrigger, Transport,
};
pub use sotto_transcribe::{
    DeltaCallback, RealtimeTranscriber, RequestOptions, TranscribeError, Transcriber,
    UploadStreamingTranscriber,
};

// App-specific modules
pub mod coordinator;
pub mod event;
pub mod pipeline;
pub mod session;

pub use coordinator::{TranscriptionCoordinator, TranscriptionRequestOptions};
pub use event::PipelineEvent;
pub use pipeline::{SubmitResult, TranscriptionPipeline};
pub use session::{AutoStopDecision, RecordingSessionCoordinator};

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
