//! Audio capture, metering and silence detection for sotto.
//!
//! The capture side records the microphone into an in-memory WAV while
//! emitting periodic level-meter samples. The analysis side turns those
//! samples into an auto-stop decision and trims silent edges off finished
//! recordings before upload.

mod capture;
mod detector;
mod meter;
mod pcm;
mod trim;

pub use capture::{MeterCallback, Recorder, RecorderError, Recording, RecordingHandle};
pub use detector::{DetectorDebug, SilenceVoiceActivityDetector};
pub use meter::{AudioMeterSample, MIN_DB, db_fs, rms_level};
pub use pcm::{decode_to_pcm16_mono, decode_wav_mono, pcm16_bytes, resample};
pub use trim::{trim_edges, trim_wav_file};
