//! Transcription coordination.
//!
//! Takes a finished recording file through best-effort edge trimming and
//! the configured transport, streaming preview deltas to the caller.
//! Trimming runs under a strict time budget and loses races gracefully;
//! scratch files are removed on every exit path, including cancellation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sotto_audio::trim_wav_file;
use sotto_core::{Config, Transport, TrimConfig};
use sotto_transcribe::{
    DEFAULT_MODEL, DeltaCallback, RealtimeTranscriber, RequestOptions, Result, TranscribeError,
    Transcriber, UploadStreamingTranscriber,
};
use tracing::{debug, info, warn};

/// Files smaller than this are still being flushed by the recorder.
const MIN_READY_BYTES: u64 = 1024;

/// Options for one coordinated transcription.
#[derive(Debug, Clone)]
pub struct TranscriptionRequestOptions {
    /// Whether edge trimming may run for this attempt
    pub enable_vad_trim: bool,
    /// Model name sent to the service
    pub model: String,
    /// Optional vocabulary/context prompt
    pub prompt: Option<String>,
    /// Optional ISO 639-1 language hint
    pub language: Option<String>,
}

impl TranscriptionRequestOptions {
    /// Snapshot per-attempt options from the live config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            enable_vad_trim: config.trim.enabled,
            model: config
                .model()
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            prompt: config.prompt().map(str::to_string),
            language: config.language().map(str::to_string),
        }
    }

    fn request(&self) -> RequestOptions {
        RequestOptions {
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            language: self.language.clone(),
        }
    }
}

/// Deletes the wrapped file when dropped, so cancelled jobs still clean
/// up after themselves.
pub(crate) struct ScratchFile(pub(crate) PathBuf);

impl ScratchFile {
    pub(crate) fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?self.0, error = %e, "failed to remove scratch file");
            }
        }
    }
}

/// Orchestrates trim → transport → final text for one recording at a time.
pub struct TranscriptionCoordinator {
    upload: UploadStreamingTranscriber,
    realtime: RealtimeTranscriber,
    transport: Transport,
    trim: TrimConfig,
}

impl TranscriptionCoordinator {
    pub fn new(config: &Config) -> Self {
        Self {
            upload: UploadStreamingTranscriber::new(),
            realtime: RealtimeTranscriber::new(config.realtime),
            transport: config.transport,
            trim: config.trim,
        }
    }

    /// Transcribe `source`, streaming the growing preview to `on_delta`.
    ///
    /// `recorded` is the capture duration, used to decide whether trimming
    /// is worth its latency cost. The source file belongs to the caller;
    /// any trimmed intermediate this call creates is deleted before it
    /// returns, on success, failure and cancellation alike.
    pub async fn transcribe(
        &self,
        source: &Path,
        recorded: Duration,
        options: &TranscriptionRequestOptions,
        api_key: &str,
        on_delta: Option<DeltaCallback>,
    ) -> Result<String> {
        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| TranscribeError::FileNotReady(e.to_string()))?;
        if metadata.len() < MIN_READY_BYTES {
            return Err(TranscribeError::FileNotReady(format!(
                "{} bytes on disk",
                metadata.len()
            )));
        }

        let trimmed = if self.should_trim(source, recorded, options) {
            self.trim_with_budget(source).await
        } else {
            None
        };
        let audio = trimmed
            .as_ref()
            .map(ScratchFile::path)
            .unwrap_or(source);

        let request = options.request();
        match self.transport {
            Transport::Upload => {
                self.upload
                    .transcribe(audio, &request, api_key, on_delta)
                    .await
            }
            Transport::Realtime => {
                match self
                    .realtime
                    .transcribe(audio, &request, api_key, on_delta.clone())
                    .await
                {
                    Err(e) if e.is_recoverable() => {
                        warn!(error = %e, "realtime transport failed, falling back to upload");
                        self.upload
                            .transcribe(audio, &request, api_key, on_delta)
                            .await
                    }
                    other => other,
                }
            }
        }
        // `trimmed` drops here (and on every early return), deleting the
        // intermediate file.
    }

    /// Trimming only pays for itself on longer recordings; compressed
    /// sources need an even higher floor since re-decoding costs more
    /// relative to their smaller size.
    fn should_trim(
        &self,
        source: &Path,
        recorded: Duration,
        options: &TranscriptionRequestOptions,
    ) -> bool {
        if !options.enable_vad_trim || !self.trim.enabled {
            return false;
        }
        let is_wav = source
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        let floor = if is_wav {
            self.trim.min_duration_secs
        } else {
            self.trim.min_compressed_duration_secs
        };
        recorded.as_secs_f32() >= floor
    }

    /// Race the trim against its time budget; whichever finishes first
    /// wins and the loser's output is discarded.
    async fn trim_with_budget(&self, source: &Path) -> Option<ScratchFile> {
        let trim_config = self.trim;
        let path = source.to_path_buf();
        let mut task = tokio::task::spawn_blocking(move || trim_wav_file(&path, &trim_config));

        tokio::select! {
            // The budget is strict: when both are ready, the timeout wins.
            biased;
            _ = tokio::time::sleep(self.trim.budget()) => {
                info!(budget_ms = self.trim.budget_ms, "trim exceeded its budget, using original audio");
                task.abort();
                // A blocking trim that already started can't be interrupted;
                // make sure its output doesn't leak if it finishes anyway.
                tokio::spawn(async move {
                    if let Ok(Ok(Some(stale))) = task.await {
                        tokio::fs::remove_file(stale).await.ok();
                    }
                });
                None
            }
            result = &mut task => match result {
                Ok(Ok(Some(trimmed))) => {
                    debug!(trimmed = ?trimmed, "using trimmed audio");
                    Some(ScratchFile(trimmed))
                }
                Ok(Ok(None)) => None,
                Ok(Err(e)) => {
                    warn!(error = %e, "trim failed, using original audio");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "trim task died, using original audio");
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    const RATE: u32 = 16_000;

    fn write_padded_wav(path: &Path, speech_secs: f32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for _ in 0..RATE {
            writer.write_sample(0i16).unwrap();
        }
        for i in 0..(speech_secs * RATE as f32) as usize {
            writer
                .write_sample(if i % 2 == 0 { 12_000i16 } else { -12_000i16 })
                .unwrap();
        }
        for _ in 0..RATE {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn coordinator(transport: Transport) -> TranscriptionCoordinator {
        let config = Config {
            transport,
            ..Default::default()
        };
        TranscriptionCoordinator::new(&config)
    }

    fn options() -> TranscriptionRequestOptions {
        TranscriptionRequestOptions::from_config(&Config::default())
    }

    #[test]
    fn test_should_trim_duration_floors() {
        let coordinator = coordinator(Transport::Upload);
        let opts = options();
        let wav = Path::new("take.wav");
        let compressed = Path::new("take.m4a");

        assert!(!coordinator.should_trim(wav, Duration::from_millis(800), &opts));
        assert!(coordinator.should_trim(wav, Duration::from_secs(2), &opts));
        // Compressed sources carry the higher floor.
        assert!(!coordinator.should_trim(compressed, Duration::from_secs(2), &opts));
        assert!(coordinator.should_trim(compressed, Duration::from_secs(4), &opts));

        let mut disabled = options();
        disabled.enable_vad_trim = false;
        assert!(!coordinator.should_trim(wav, Duration::from_secs(10), &disabled));
    }

    #[tokio::test]
    async fn test_trim_with_budget_produces_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("take.wav");
        write_padded_wav(&source, 1.5);

        let coordinator = coordinator(Transport::Upload);
        let trimmed_path = {
            let trimmed = coordinator.trim_with_budget(&source).await.expect("trims");
            assert!(trimmed.path().exists());
            trimmed.path().to_path_buf()
        };
        // Dropping the guard removed the file.
        assert!(!trimmed_path.exists());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_zero_budget_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("take.wav");
        write_padded_wav(&source, 1.5);

        let mut config = Config::default();
        config.trim.budget_ms = 0;
        let coordinator = TranscriptionCoordinator::new(&config);

        assert!(coordinator.trim_with_budget(&source).await.is_none());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_tiny_file_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("partial.wav");
        std::fs::write(&source, b"RIFF").unwrap();

        let coordinator = coordinator(Transport::Upload);
        let err = coordinator
            .transcribe(&source, Duration::from_secs(2), &options(), "sk-test", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::FileNotReady(_)));
    }

    #[tokio::test]
    async fn test_missing_file_not_ready() {
        let coordinator = coordinator(Transport::Upload);
        let err = coordinator
            .transcribe(
                Path::new("/nonexistent/take.wav"),
                Duration::from_secs(2),
                &options(),
                "sk-test",
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::FileNotReady(_)));
    }
}
