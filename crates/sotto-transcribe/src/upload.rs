//! Streaming multipart upload transport.
//!
//! The primary path POSTs the audio as multipart form data with
//! `stream=true` and consumes the SSE-style response for incremental
//! text. The file part is fed through a bounded producer/consumer
//! channel so the audio is never fully materialized in memory and a
//! backpressured socket never blocks the response reader. On recoverable
//! failure the transport falls back to a one-shot non-streaming request
//! with bounded exponential-backoff retries.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response, StatusCode};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::{StreamEvent, parse_stream_event};
use crate::retry::RetryPolicy;
use crate::{DeltaCallback, RequestOptions, Result, TranscribeError, Transcriber};

pub(crate) const TRANSCRIPTION_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";

/// End-of-stream sentinel in the SSE response.
const DONE_SENTINEL: &str = "[DONE]";

const FILE_STREAM_CHUNK: usize = 64 * 1024;
const FILE_CHANNEL_DEPTH: usize = 4;

/// Upload transport with streaming preview and non-streaming fallback.
pub struct UploadStreamingTranscriber {
    client: Client,
    endpoint: String,
    retry: RetryPolicy,
}

impl UploadStreamingTranscriber {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Use a shared HTTP client (keeps warmed connections poolable).
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            endpoint: TRANSCRIPTION_ENDPOINT.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the endpoint (tests, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the fallback retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the file part backed by a bounded chunk channel.
    ///
    /// A reader task feeds 64 KiB chunks into the channel; the request
    /// body drains it. Dropping the body (request cancelled) closes the
    /// channel and stops the reader at the next chunk boundary. Read
    /// errors travel through the same channel and fail the request.
    async fn file_part(&self, path: &Path) -> Result<Part> {
        let len = tokio::fs::metadata(path)
            .await
            .map_err(|e| TranscribeError::FileNotReady(e.to_string()))?
            .len();

        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(FILE_CHANNEL_DEPTH);
        let reader_path = path.to_path_buf();
        tokio::spawn(async move {
            let mut file = match tokio::fs::File::open(&reader_path).await {
                Ok(file) => file,
                Err(e) => {
                    tx.send(Err(e)).await.ok();
                    return;
                }
            };
            let mut buf = vec![0u8; FILE_STREAM_CHUNK];
            loop {
                match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                            // Body dropped; stop reading.
                            break;
                        }
                    }
                    Err(e) => {
                        tx.send(Err(e)).await.ok();
                        break;
                    }
                }
            }
        });

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording.wav".to_string());

        Part::stream_with_length(Body::wrap_stream(stream), len)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::Network(e.to_string()))
    }

    /// Multipart form: fields first, then the file part.
    async fn form(&self, path: &Path, options: &RequestOptions, streaming: bool) -> Result<Form> {
        let mut form = Form::new()
            .text("model", options.model.clone())
            .text("response_format", if streaming { "json" } else { "text" });
        if streaming {
            form = form.text("stream", "true");
        }
        if let Some(language) = &options.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = &options.prompt {
            form = form.text("prompt", prompt.clone());
        }
        Ok(form.part("file", self.file_part(path).await?))
    }

    async fn transcribe_streaming(
        &self,
        path: &Path,
        options: &RequestOptions,
        api_key: &str,
        on_delta: Option<&DeltaCallback>,
    ) -> Result<String> {
        let form = self.form(path, options, true).await?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut pending = String::new();
        let mut accumulated = String::new();
        let mut final_text: Option<String> = None;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            pending.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = pending.find('\n') {
                let line = pending[..newline].trim().to_string();
                pending.drain(..=newline);
                match self.handle_line(&line, &mut accumulated, on_delta)? {
                    LineOutcome::Continue => {}
                    LineOutcome::Finished(text) => {
                        final_text = Some(text);
                        break 'read;
                    }
                }
            }
        }

        // A final line without a trailing newline still counts.
        if final_text.is_none() {
            let line = pending.trim().to_string();
            if let LineOutcome::Finished(text) =
                self.handle_line(&line, &mut accumulated, on_delta)?
            {
                final_text = Some(text);
            }
        }

        // Accumulated deltas are the answer when no explicit done arrived.
        let text = final_text.unwrap_or(accumulated);
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(TranscribeError::EmptyText);
        }
        Ok(text)
    }

    /// Process one SSE line, folding deltas into `accumulated`.
    fn handle_line(
        &self,
        line: &str,
        accumulated: &mut String,
        on_delta: Option<&DeltaCallback>,
    ) -> Result<LineOutcome> {
        if line.is_empty() {
            return Ok(LineOutcome::Continue);
        }
        let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
        if payload == DONE_SENTINEL {
            return Ok(LineOutcome::Finished(accumulated.clone()));
        }

        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(_) => {
                debug!(line = %payload, "skipping unparsable stream line");
                return Ok(LineOutcome::Continue);
            }
        };

        match parse_stream_event(&value) {
            StreamEvent::Delta(delta) => {
                accumulated.push_str(&delta);
                if let Some(on_delta) = on_delta {
                    on_delta(accumulated.as_str());
                }
                Ok(LineOutcome::Continue)
            }
            StreamEvent::Done(text) => {
                let text = if text.is_empty() {
                    accumulated.clone()
                } else {
                    text
                };
                Ok(LineOutcome::Finished(text))
            }
            StreamEvent::Error(message) => Err(TranscribeError::InvalidResponse(message)),
            StreamEvent::Ignore => Ok(LineOutcome::Continue),
        }
    }

    /// One-shot non-streaming request.
    async fn transcribe_once(
        &self,
        path: &Path,
        options: &RequestOptions,
        api_key: &str,
    ) -> Result<String> {
        let form = self.form(path, options, false).await?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;
        let response = check_status(response).await?;

        let text = response.text().await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(TranscribeError::EmptyText);
        }
        Ok(text)
    }

    /// Non-streaming fallback with bounded exponential backoff.
    ///
    /// The last attempt's error is surfaced verbatim.
    async fn transcribe_with_retries(
        &self,
        path: &Path,
        options: &RequestOptions,
        api_key: &str,
    ) -> Result<String> {
        let mut delay = self.retry.initial_delay();
        let mut attempt = 1;
        loop {
            match self.transcribe_once(path, options, api_key).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.retry.max_attempts() && self.retry.should_retry(&e) => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transcription attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = self.retry.next_delay(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for UploadStreamingTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum LineOutcome {
    Continue,
    Finished(String),
}

/// Map non-success statuses onto the error taxonomy.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => TranscribeError::Unauthorized,
        StatusCode::PAYLOAD_TOO_LARGE => TranscribeError::FileTooLarge,
        _ => TranscribeError::Server {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl Transcriber for UploadStreamingTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        options: &RequestOptions,
        api_key: &str,
        on_delta: Option<DeltaCallback>,
    ) -> Result<String> {
        debug!(
            model = %options.model,
            language = ?options.language,
            "starting streaming upload"
        );
        match self
            .transcribe_streaming(audio, options, api_key, on_delta.as_ref())
            .await
        {
            Ok(text) => Ok(text),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "streaming upload failed, falling back to non-streaming");
                self.transcribe_with_retries(audio, options, api_key).await
            }
            // Terminal errors propagate immediately; no fallback can
            // change the outcome.
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "upload-streaming"
    }
}
