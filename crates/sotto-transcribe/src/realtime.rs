//! Realtime WebSocket transport.
//!
//! Opens a realtime session, configures server-side turn detection,
//! streams the recording as base64 PCM16 append messages, commits, and
//! collects delta/done events until the server finishes or a hard
//! timeout fires. A timed-out or failed attempt drops the socket
//! (abnormal close); success closes it cleanly.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use sotto_audio::decode_to_pcm16_mono;
use sotto_core::RealtimeTuning;

use crate::event::{StreamEvent, parse_stream_event};
use crate::{DeltaCallback, RequestOptions, Result, TranscribeError, Transcriber};

const REALTIME_ENDPOINT: &str = "wss://api.openai.com/v1/realtime?intent=transcription";

/// Realtime protocol PCM sample rate.
const REALTIME_SAMPLE_RATE: u32 = 24_000;

/// Bytes per append message: ~0.67 s of 24 kHz mono PCM16.
const CHUNK_BYTES: usize = 16_000 * 2;

/// Realtime transport speaking the WebSocket transcription protocol.
pub struct RealtimeTranscriber {
    endpoint: String,
    tuning: RealtimeTuning,
}

impl RealtimeTranscriber {
    pub fn new(tuning: RealtimeTuning) -> Self {
        Self {
            endpoint: REALTIME_ENDPOINT.to_string(),
            tuning,
        }
    }

    /// Override the endpoint (tests, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn run(
        &self,
        audio: &Path,
        options: &RequestOptions,
        api_key: &str,
        on_delta: Option<DeltaCallback>,
    ) -> Result<String> {
        // Single-shot conversion to the protocol's fixed PCM format.
        let source = audio.to_path_buf();
        let pcm = tokio::task::spawn_blocking(move || {
            decode_to_pcm16_mono(&source, REALTIME_SAMPLE_RATE)
        })
        .await
        .map_err(|e| TranscribeError::Network(e.to_string()))?
        .map_err(|e| TranscribeError::FileNotReady(e.to_string()))?;

        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| TranscribeError::Network(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| TranscribeError::Network(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws, _) = connect_async(request).await.map_err(connect_error)?;
        debug!(pcm_bytes = pcm.len(), "realtime websocket connected");
        let (mut sink, mut stream) = ws.split();

        sink.send(Message::Text(
            build_session_update(options, &self.tuning).to_string(),
        ))
        .await
        .map_err(send_error)?;

        let writer = async {
            for chunk in pcm.chunks(CHUNK_BYTES) {
                let append = json!({
                    "type": "input_audio_buffer.append",
                    "audio": BASE64.encode(chunk),
                });
                sink.send(Message::Text(append.to_string()))
                    .await
                    .map_err(send_error)?;
                // Let the reader drain between sends.
                tokio::task::yield_now().await;
            }
            sink.send(Message::Text(
                json!({"type": "input_audio_buffer.commit"}).to_string(),
            ))
            .await
            .map_err(send_error)?;
            Ok::<_, TranscribeError>(())
        };

        let reader = async {
            let mut accumulated = String::new();
            loop {
                let Some(message) = stream.next().await else {
                    // Server went away without a done event; the deltas we
                    // have are the best answer.
                    break Ok(accumulated.clone());
                };
                let message = message.map_err(|e| TranscribeError::Network(e.to_string()))?;
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break Ok(accumulated.clone()),
                    _ => continue,
                };
                let Ok(value) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                match parse_stream_event(&value) {
                    StreamEvent::Delta(delta) => {
                        accumulated.push_str(&delta);
                        if let Some(on_delta) = on_delta.as_ref() {
                            on_delta(accumulated.as_str());
                        }
                    }
                    StreamEvent::Done(text) => {
                        break Ok(if text.is_empty() {
                            accumulated.clone()
                        } else {
                            text
                        });
                    }
                    StreamEvent::Error(message) => {
                        break Err(TranscribeError::InvalidResponse(message));
                    }
                    StreamEvent::Ignore => {}
                }
            }
        };

        let outcome = tokio::time::timeout(self.tuning.hard_timeout(), async {
            let (write_result, read_result) = tokio::join!(writer, reader);
            write_result?;
            read_result
        })
        .await;

        match outcome {
            Err(_) => {
                warn!(
                    timeout_secs = self.tuning.hard_timeout_secs,
                    "realtime transcription hit hard timeout"
                );
                Err(TranscribeError::Timeout)
            }
            Ok(Ok(text)) => {
                sink.close().await.ok();
                let text = text.trim().to_string();
                if text.is_empty() {
                    Err(TranscribeError::EmptyText)
                } else {
                    Ok(text)
                }
            }
            Ok(Err(e)) => Err(e),
        }
    }
}

/// Session configuration sent before any audio.
fn build_session_update(options: &RequestOptions, tuning: &RealtimeTuning) -> Value {
    let mut transcription = json!({"model": options.model});
    if let Some(language) = &options.language {
        transcription["language"] = json!(language);
    }
    if let Some(prompt) = &options.prompt {
        transcription["prompt"] = json!(prompt);
    }
    json!({
        "type": "session.update",
        "session": {
            "input_audio_format": "pcm16",
            "input_audio_transcription": transcription,
            "turn_detection": {
                "type": "server_vad",
                "silence_duration_ms": tuning.silence_duration_ms,
                "prefix_padding_ms": tuning.prefix_padding_ms,
            },
        },
    })
}

fn connect_error(e: tungstenite::Error) -> TranscribeError {
    match &e {
        tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
            TranscribeError::Unauthorized
        }
        _ => TranscribeError::Network(e.to_string()),
    }
}

fn send_error(e: tungstenite::Error) -> TranscribeError {
    TranscribeError::Network(e.to_string())
}

#[async_trait]
impl Transcriber for RealtimeTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        options: &RequestOptions,
        api_key: &str,
        on_delta: Option<DeltaCallback>,
    ) -> Result<String> {
        self.run(audio, options, api_key, on_delta).await
    }

    fn name(&self) -> &str {
        "realtime"
    }
}
