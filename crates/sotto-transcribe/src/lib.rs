//! Transcription transports for sotto.
//!
//! This crate provides a trait-based abstraction over the two ways audio
//! reaches the transcription service: a chunked multipart upload with an
//! SSE-style streaming response, and a realtime WebSocket session fed raw
//! PCM. Shared infrastructure lives here too: error classification,
//! retry backoff, stream-event parsing, connection warming and preview
//! coalescing.

mod event;
mod preview;
mod realtime;
mod retry;
mod upload;
mod warmth;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
pub use event::{StreamEvent, parse_stream_event};
pub use preview::{DEFAULT_PREVIEW_INTERVAL, PreviewDeltaCoalescer};
pub use realtime::RealtimeTranscriber;
pub use retry::RetryPolicy;
use thiserror::Error;
pub use upload::UploadStreamingTranscriber;
pub use warmth::ConnectionWarmth;

/// Default transcription model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini-transcribe";

/// Errors that can occur during transcription.
///
/// Every variant is classified as terminal or recoverable; retries and
/// transport fallbacks only ever run for recoverable errors.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("audio exceeds the service's file size limit")]
    FileTooLarge,

    #[error("invalid or missing API credential")]
    Unauthorized,

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("transcription produced no text")]
    EmptyText,

    #[error("audio file not ready: {0}")]
    FileNotReady(String),
}

impl TranscribeError {
    /// Whether a retry or transport fallback could change the outcome.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) | Self::InvalidResponse(_) => true,
            Self::Server { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            Self::Unauthorized | Self::FileTooLarge | Self::EmptyText | Self::FileNotReady(_) => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for TranscribeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Result type for transcription operations.
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// Callback receiving the running transcript preview as deltas arrive.
pub type DeltaCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Options for one transcription attempt.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Model name sent to the service
    pub model: String,
    /// Optional vocabulary/context prompt
    pub prompt: Option<String>,
    /// Optional ISO 639-1 language hint
    pub language: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            prompt: None,
            language: None,
        }
    }
}

/// Trait for transcription transports.
///
/// Both transports take a finished audio file and produce final text,
/// optionally streaming the growing preview through `on_delta` along the
/// way.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file to text.
    async fn transcribe(
        &self,
        audio: &Path,
        options: &RequestOptions,
        api_key: &str,
        on_delta: Option<DeltaCallback>,
    ) -> Result<String>;

    /// Returns the name of this transport for logging/debugging.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_errors_not_recoverable() {
        assert!(!TranscribeError::Unauthorized.is_recoverable());
        assert!(!TranscribeError::FileTooLarge.is_recoverable());
        assert!(!TranscribeError::EmptyText.is_recoverable());
        assert!(!TranscribeError::FileNotReady("tiny".into()).is_recoverable());
    }

    #[test]
    fn test_transport_errors_recoverable() {
        assert!(TranscribeError::Timeout.is_recoverable());
        assert!(TranscribeError::Network("reset".into()).is_recoverable());
        assert!(TranscribeError::InvalidResponse("bad json".into()).is_recoverable());
    }

    #[test]
    fn test_server_recoverable_statuses() {
        let server = |status| TranscribeError::Server {
            status,
            message: String::new(),
        };
        assert!(server(408).is_recoverable());
        assert!(server(429).is_recoverable());
        assert!(server(500).is_recoverable());
        assert!(server(503).is_recoverable());
        assert!(server(599).is_recoverable());
        assert!(!server(400).is_recoverable());
        assert!(!server(403).is_recoverable());
        assert!(!server(404).is_recoverable());
    }
}
