//! Processing pipeline for finished recordings.
//!
//! Owns a small tokio runtime so a synchronous event loop can hand off
//! recordings without blocking. Each submission is written to a scratch
//! file, coordinated through trim and transport, and reported back on an
//! event channel; preview deltas are coalesced to UI cadence on the way
//! out.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use sotto_audio::Recording;
use sotto_core::{APP_NAME, Config, SessionPhase};
use sotto_transcribe::{
    ConnectionWarmth, DEFAULT_PREVIEW_INTERVAL, DeltaCallback, PreviewDeltaCoalescer,
    TranscribeError,
};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use crate::coordinator::{ScratchFile, TranscriptionCoordinator, TranscriptionRequestOptions};
use crate::event::PipelineEvent;

/// How long recording lifecycle events keep the connection warm.
const KEEP_WARM_WINDOW: Duration = Duration::from_secs(30);

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

type TranscriptionTask = tokio::task::JoinHandle<JobResult>;

pub enum SubmitResult {
    Sent,
    Discarded,
}

enum JobResult {
    Success(String),
    Failed(TranscribeError),
}

/// Pipeline for transcribing finished recordings. Submissions are
/// non-blocking and processed in order.
pub struct TranscriptionPipeline {
    runtime: Runtime,
    coordinator: Arc<TranscriptionCoordinator>,
    config: Arc<RwLock<Config>>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    tasks: mpsc::UnboundedSender<TranscriptionTask>,
    active: Mutex<Option<AbortHandle>>,
}

impl TranscriptionPipeline {
    /// Create a new pipeline instance.
    ///
    /// Returns the pipeline and the receiving end of its event channel.
    pub fn new(
        config: Arc<RwLock<Config>>,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>)> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;

        let coordinator = Arc::new(TranscriptionCoordinator::new(&config.read()));

        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let tasks = start_results_collector(&runtime, event_sender.clone());

        Ok((
            Self {
                runtime,
                coordinator,
                config,
                events: event_sender,
                tasks,
                active: Mutex::new(None),
            },
            event_receiver,
        ))
    }

    /// Capture has started: pre-establish the connection so it's warm by
    /// the time the recording lands.
    pub fn recording_started(&self) {
        let _guard = self.runtime.enter();
        let warmth = ConnectionWarmth::global();
        warmth.prewarm();
        warmth.keep_warm(KEEP_WARM_WINDOW);
        self.events
            .send(PipelineEvent::PhaseChanged(SessionPhase::Listening))
            .ok();
    }

    /// Submits a finished recording to the processing pipeline. This is
    /// non-blocking and all recordings are processed in order.
    pub fn submit(&self, recording: Recording) -> anyhow::Result<SubmitResult> {
        info!(
            samples = recording.samples(),
            bytes = recording.data().len(),
            bytes_mb = recording.data().len() as f64 / (1024.0 * 1024.0),
            length_seconds = recording.duration().as_secs_f64(),
            "audio submitted"
        );

        if recording.duration() < self.config.read().discard_duration() {
            info!(discard_duration = ?self.config.read().discard_duration(), "discarding recording");
            self.events
                .send(PipelineEvent::PhaseChanged(SessionPhase::Idle))
                .ok();
            return Ok(SubmitResult::Discarded);
        }

        // The recording just stopped; extend the warm window through the
        // upload.
        {
            let _guard = self.runtime.enter();
            ConnectionWarmth::global().keep_warm(KEEP_WARM_WINDOW);
        }

        self.events
            .send(PipelineEvent::PhaseChanged(SessionPhase::Transcribing))
            .ok();

        let coordinator = self.coordinator.clone();
        let config = self.config.clone();
        let events = self.events.clone();

        let handle = self
            .runtime
            .spawn(run_job(coordinator, config, recording, events));
        *self.active.lock() = Some(handle.abort_handle());
        self.tasks.send(handle)?;
        Ok(SubmitResult::Sent)
    }

    /// Abort the in-flight transcription, if any.
    ///
    /// Cancellation is a deliberate no-op path: the job's scratch files
    /// are still cleaned up and no error event is emitted.
    pub fn cancel_active(&self) {
        if let Some(handle) = self.active.lock().take() {
            handle.abort();
        }
    }
}

/// Run one recording through the coordinator, timing it along the way.
async fn run_job(
    coordinator: Arc<TranscriptionCoordinator>,
    config: Arc<RwLock<Config>>,
    recording: Recording,
    events: mpsc::UnboundedSender<PipelineEvent>,
) -> JobResult {
    let (options, api_key) = {
        let config = config.read();
        let Some(api_key) = config.key_openai().map(str::to_string) else {
            return JobResult::Failed(TranscribeError::Unauthorized);
        };
        (TranscriptionRequestOptions::from_config(&config), api_key)
    };

    let duration = recording.duration();
    let bytes = recording.data().len();
    let scratch = match write_scratch(recording).await {
        Ok(scratch) => scratch,
        Err(e) => return JobResult::Failed(e),
    };

    let coalescer = PreviewDeltaCoalescer::new(DEFAULT_PREVIEW_INTERVAL, {
        let events = events.clone();
        move |preview| {
            events.send(PipelineEvent::PreviewDelta(preview)).ok();
        }
    });
    let on_delta: DeltaCallback = Arc::new(move |preview: &str| coalescer.push(preview));

    let before = Instant::now();
    let result = coordinator
        .transcribe(scratch.path(), duration, &options, &api_key, Some(on_delta))
        .await;
    let elapsed = before.elapsed();

    match result {
        Ok(text) => {
            let mb_per_second = bytes as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64();
            info!(
                duration = ?elapsed,
                mb_per_second = mb_per_second,
                "transcription completed"
            );
            JobResult::Success(text)
        }
        Err(e) => JobResult::Failed(e),
    }
}

/// Persist the recording where the coordinator can stream it from.
async fn write_scratch(recording: Recording) -> Result<ScratchFile, TranscribeError> {
    let path = scratch_path();
    tokio::fs::write(&path, recording.data())
        .await
        .map_err(|e| TranscribeError::FileNotReady(e.to_string()))?;
    Ok(ScratchFile(path))
}

fn scratch_path() -> PathBuf {
    let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("{}-{}-{}.wav", APP_NAME, std::process::id(), n))
}

fn start_results_collector(
    runtime: &Runtime,
    events: mpsc::UnboundedSender<PipelineEvent>,
) -> mpsc::UnboundedSender<TranscriptionTask> {
    let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<TranscriptionTask>();

    runtime.spawn(async move {
        while let Some(task) = task_receiver.recv().await {
            match task.await {
                Ok(JobResult::Success(text)) => {
                    info!("Transcription: {}", text);
                    events.send(PipelineEvent::TranscriptReady(text)).ok();
                }
                Ok(JobResult::Failed(e)) => {
                    error!(error = %e, "transcription failed");
                    events.send(PipelineEvent::Failed(e.to_string())).ok();
                }
                Err(e) if e.is_cancelled() => {
                    // User-initiated cancellation is not an error.
                    debug!("transcription cancelled");
                }
                Err(e) => {
                    error!("Error joining transcription task: {:?}", e);
                    events
                        .send(PipelineEvent::Failed("transcription task failed".to_string()))
                        .ok();
                }
            }
            events
                .send(PipelineEvent::PhaseChanged(SessionPhase::Idle))
                .ok();
        }

        error!("Results collector task ended unexpectedly");
    });

    task_sender
}
