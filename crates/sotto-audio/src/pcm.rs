//! PCM decode and conversion helpers for the realtime transport.

use std::path::Path;

use anyhow::{Result, anyhow};
use hound::WavReader;
use rubato::{FftFixedIn, Resampler};
use tracing::debug;

const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Decode a WAV file to mono f32 samples, returning the source sample rate.
///
/// Interleaved channels are averaged into one.
pub fn decode_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Result<Vec<f32>, _> = match spec.sample_format {
        hound::SampleFormat::Int => match spec.bits_per_sample {
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
                .collect(),
            32 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / i32::MAX as f32))
                .collect(),
            bits => return Err(anyhow!("unsupported bit depth: {bits}")),
        },
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
    };
    let interleaved = samples?;

    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    debug!(
        path = ?path,
        samples = mono.len(),
        sample_rate = spec.sample_rate,
        channels,
        "decoded wav"
    );
    Ok((mono, spec.sample_rate))
}

/// Resample mono f32 audio from `from_hz` to `to_hz`.
pub fn resample(samples: &[f32], from_hz: u32, to_hz: u32) -> Result<Vec<f32>> {
    if from_hz == to_hz {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_hz as usize,
        to_hz as usize,
        RESAMPLER_CHUNK_SIZE,
        1,
        1,
    )
    .map_err(|e| anyhow!("failed to create resampler: {e}"))?;

    let mut output = Vec::new();
    let mut pos = 0;

    while pos + RESAMPLER_CHUNK_SIZE <= samples.len() {
        let chunk = &samples[pos..pos + RESAMPLER_CHUNK_SIZE];
        let out = resampler
            .process(&[chunk], None)
            .map_err(|e| anyhow!("resampler failed: {e}"))?;
        output.extend_from_slice(&out[0]);
        pos += RESAMPLER_CHUNK_SIZE;
    }

    // Zero-pad the tail chunk, then keep only the audio that corresponds
    // to real input.
    if pos < samples.len() {
        let remaining = samples.len() - pos;
        let mut last = vec![0.0; RESAMPLER_CHUNK_SIZE];
        last[..remaining].copy_from_slice(&samples[pos..]);
        let out = resampler
            .process(&[&last[..]], None)
            .map_err(|e| anyhow!("resampler failed: {e}"))?;
        let keep = (remaining as f64 * to_hz as f64 / from_hz as f64) as usize;
        output.extend_from_slice(&out[0][..keep.min(out[0].len())]);
    }

    Ok(output)
}

/// Convert f32 samples to little-endian 16-bit PCM bytes.
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let v = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a WAV file to mono 16-bit PCM at `target_hz`, the single-shot
/// conversion the realtime transport streams from.
pub fn decode_to_pcm16_mono(path: &Path, target_hz: u32) -> Result<Vec<u8>> {
    let (mono, source_hz) = decode_wav_mono(path)?;
    let resampled = resample(&mono, source_hz, target_hz)?;
    Ok(pcm16_bytes(&resampled))
}
