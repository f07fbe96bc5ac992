//! Audio level metering.

use std::time::Duration;

/// Floor for dBFS conversions. Anything quieter is reported as this value.
pub const MIN_DB: f32 = -96.0;

/// One periodic level reading from the capture stream.
///
/// Produced roughly every 90 ms while recording; consumed by the silence
/// detector and by whatever level meter the embedding UI draws.
#[derive(Debug, Clone, Copy)]
pub struct AudioMeterSample {
    /// Root-mean-square level, normalized to [0, 1]
    pub rms: f32,
    /// Instantaneous peak level in dBFS
    pub db: f32,
    /// Span of audio this sample covers
    pub frame: Duration,
}

impl AudioMeterSample {
    /// Compute a meter sample from one frame of interleaved f32 samples.
    pub fn from_frame(data: &[f32], frame: Duration) -> Self {
        Self {
            rms: rms_level(data),
            db: db_fs(data),
            frame,
        }
    }
}

/// Convert a slice of f32 samples to peak dBFS.
pub fn db_fs(data: &[f32]) -> f32 {
    let max_sample = data
        .iter()
        .fold(0.0f32, |max, &sample| sample.abs().max(max));

    (20.0 * max_sample.log10()).clamp(MIN_DB, 0.0)
}

/// Root-mean-square of a slice of f32 samples, clamped to [0, 1].
pub fn rms_level(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = data.iter().map(|s| s * s).sum();
    (sum_sq / data.len() as f32).sqrt().clamp(0.0, 1.0)
}
