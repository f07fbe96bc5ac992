//! Microphone capture. There can only be one active recording at a time
//! and storage/processing are not managed by this module.
//!
//! The input stream is written to an in-memory WAV while a level meter
//! callback fires roughly every 90 ms with the frame's RMS and peak dB,
//! feeding both the silence detector and any UI meter.

use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Host;
use hound::WavWriter;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info};

use crate::meter::AudioMeterSample;

/// Target spacing between meter samples.
const METER_INTERVAL: Duration = Duration::from_millis(90);

/// Callback invoked with each periodic meter sample.
pub type MeterCallback = Arc<dyn Fn(AudioMeterSample) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RecorderError {
    /// generic anyhow error
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    /// No recording device available
    #[error("no input device available")]
    NoInputDevice,
    /// Sample format not supported
    #[error("sample format not supported: {0}")]
    SampleFormatNotSupported(String),
    /// Build stream error
    #[error(transparent)]
    BuildStream(#[from] cpal::BuildStreamError),
}

type Result<T> = std::result::Result<T, RecorderError>;
type WavWriterHandle = Arc<Mutex<Option<WavWriter<MemoryWriter>>>>;

/// A cheaply cloneable handle to the inner data that is being recorded. The
/// finalize method for the wav writer does not return the inner data, so we
/// store it behind an Arc<Mutex> to allow for cheap cloning and access to the
/// inner data.
#[derive(Clone)]
struct MemoryWriter {
    inner: Arc<Mutex<Cursor<Vec<u8>>>>,
}

impl MemoryWriter {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Cursor::new(Vec::with_capacity(8 * 1024)))),
        }
    }

    fn try_into_inner(self) -> Result<Vec<u8>> {
        // Attempt to own the inner arc
        let owned = Arc::try_unwrap(self.inner).map_err(|_| {
            RecorderError::Anyhow(anyhow!("Failed to unwrap inner Arc in MemoryWriter"))
        })?;
        let cursor = owned.into_inner();
        Ok(cursor.into_inner())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.lock().seek(pos)
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// A finished recording and its format.
#[derive(Debug, Clone)]
pub struct Recording {
    data: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    samples: usize,
}

impl Recording {
    /// Encoded WAV bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the recording, returning the WAV bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Number of interleaved samples written.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Capture sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Captured audio length.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples / self.channels as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

/// State carried by the input-stream callback.
struct MeterState {
    frame: Vec<f32>,
    samples_per_frame: usize,
    frame_duration: Duration,
    callback: Option<MeterCallback>,
}

pub struct Recorder {
    host: Host,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    /// Start capturing from the default input device.
    ///
    /// `meter` receives a level sample roughly every 90 ms for the life of
    /// the recording.
    pub fn start_recording(&self, meter: Option<MeterCallback>) -> Result<RecordingHandle> {
        let device = self
            .host
            .default_input_device()
            .ok_or(RecorderError::NoInputDevice)?;
        let config = device
            .default_input_config()
            .map_err(|_| RecorderError::NoInputDevice)?;

        info!(device_name=%device.name().unwrap_or_else(|_| "unknown".into()), config=?config, "Recording from device");

        let spec = wav_spec_from_config(&config);
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        let buffer = MemoryWriter::new();
        let writer =
            WavWriter::new(buffer.clone(), spec).map_err(|e| RecorderError::Anyhow(e.into()))?;
        let writer = Arc::new(Mutex::new(Some(writer)));

        let writer_2 = writer.clone();
        let samples_written = Arc::new(AtomicUsize::new(0));
        let samples_written_2 = samples_written.clone();

        let err_fn = move |err| {
            error!("an error occurred on stream: {}", err);
        };

        let samples_per_frame =
            ((sample_rate as f64 * METER_INTERVAL.as_secs_f64()) as usize * channels as usize)
                .max(1);
        let mut state = MeterState {
            frame: Vec::with_capacity(samples_per_frame),
            samples_per_frame,
            frame_duration: METER_INTERVAL,
            callback: meter,
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data, _: &_| {
                    write_data(&mut state, data, &writer_2, &samples_written_2)
                },
                err_fn,
                None,
            )?,
            sample_format => {
                return Err(RecorderError::SampleFormatNotSupported(format!(
                    "{:?}",
                    sample_format
                )));
            }
        };

        stream
            .play()
            .map_err(|_| anyhow!("failed to play stream"))?;

        Ok(RecordingHandle {
            stream,
            writer,
            buffer: Some(buffer),
            sample_rate,
            channels,
            samples_written,
        })
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the active recording. When dropped or finalized, the recording
/// will end. You must call `finish` to receive the data.
pub struct RecordingHandle {
    stream: cpal::Stream,
    writer: WavWriterHandle,
    // The buffer the data is being written to. Presence of this buffer
    // indicates if the recording has been finalized or not.
    buffer: Option<MemoryWriter>,
    sample_rate: u32,
    channels: u16,
    samples_written: Arc<AtomicUsize>,
}

impl RecordingHandle {
    pub fn finish(&mut self) -> Result<Option<Recording>> {
        if self.buffer.is_none() {
            return Ok(None);
        }
        info!("Ending recording.");
        let buffer = self.buffer.take().unwrap();
        self.stream.pause().ok();
        // Finalize the writer so it writes the proper framing information.
        self.writer
            .lock()
            .take()
            .unwrap()
            .finalize()
            .map_err(|e| RecorderError::Anyhow(anyhow!("Failed to finalize writer: {}", e)))?;
        let data = buffer.try_into_inner()?;
        Ok(Some(Recording {
            data,
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples: self.samples_written.load(Ordering::Relaxed),
        }))
    }
}

impl Drop for RecordingHandle {
    fn drop(&mut self) {
        if self.buffer.is_some() {
            if let Err(e) = self.finish() {
                error!("failed to finalize recording: {}", e);
            }
        }
    }
}

fn wav_spec_from_config(config: &cpal::SupportedStreamConfig) -> hound::WavSpec {
    hound::WavSpec {
        channels: config.channels(),
        sample_rate: config.sample_rate().0,
        bits_per_sample: (config.sample_format().sample_size() * 8) as _,
        sample_format: sample_format(config.sample_format()),
    }
}

fn sample_format(format: cpal::SampleFormat) -> hound::SampleFormat {
    if format.is_float() {
        hound::SampleFormat::Float
    } else {
        hound::SampleFormat::Int
    }
}

fn write_data(
    state: &mut MeterState,
    data: &[f32],
    writer: &WavWriterHandle,
    samples_written: &Arc<AtomicUsize>,
) {
    if let Some(mut guard) = writer.try_lock() {
        if let Some(writer) = guard.as_mut() {
            for &sample in data.iter() {
                writer.write_sample(sample).ok();
            }
            samples_written.fetch_add(data.len(), Ordering::Relaxed);
        }
    }

    let Some(callback) = state.callback.as_ref() else {
        return;
    };
    state.frame.extend_from_slice(data);
    while state.frame.len() >= state.samples_per_frame {
        let sample =
            AudioMeterSample::from_frame(&state.frame[..state.samples_per_frame], state.frame_duration);
        callback(sample);
        state.frame.drain(..state.samples_per_frame);
    }
}
