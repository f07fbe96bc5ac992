//! Edge-silence trimming.
//!
//! One-shot pass over a finished recording: find the first and last sample
//! that look like speech and keep only that window plus padding. Trimming
//! exists purely to cut upload latency; every failure path keeps the
//! original audio untouched.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{debug, warn};

use crate::pcm::decode_wav_mono;
use sotto_core::TrimConfig;

/// Trim silent edges off a mono sample buffer.
///
/// Returns a subslice of the input: the speech window expanded by
/// `padding_seconds` on each side, clamped to the buffer. If no sample
/// exceeds the threshold, or the scan produces an inconsistent window,
/// the input is returned unchanged.
pub fn trim_edges<'a>(
    samples: &'a [f32],
    sample_rate: u32,
    amplitude_threshold: f32,
    padding_seconds: f32,
) -> &'a [f32] {
    let Some(speech_start) = samples
        .iter()
        .position(|s| s.abs() > amplitude_threshold)
    else {
        return samples;
    };
    let Some(speech_end) = samples
        .iter()
        .rposition(|s| s.abs() > amplitude_threshold)
    else {
        return samples;
    };
    if speech_end < speech_start {
        return samples;
    }

    let pad = (padding_seconds.max(0.0) * sample_rate as f32) as usize;
    let start = speech_start.saturating_sub(pad);
    let end = (speech_end + pad + 1).min(samples.len());
    &samples[start..end]
}

/// Trim a WAV file's silent edges into a sibling file.
///
/// Returns `Ok(Some(path))` with the trimmed file when trimming helped, or
/// `Ok(None)` when the original should be used: the source couldn't be
/// decoded, nothing was trimmed, or the re-encoded output came out at
/// least as large as the source.
pub fn trim_wav_file(source: &Path, config: &TrimConfig) -> Result<Option<PathBuf>> {
    let (samples, sample_rate) = match decode_wav_mono(source) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(source = ?source, error = %e, "could not decode for trimming, keeping original");
            return Ok(None);
        }
    };

    let trimmed = trim_edges(
        &samples,
        sample_rate,
        config.amplitude_threshold,
        config.padding_seconds,
    );
    if trimmed.len() == samples.len() {
        return Ok(None);
    }

    let out_path = trimmed_path(source);
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&out_path, spec)?;
    for &sample in trimmed {
        let v = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer.write_sample(v)?;
    }
    writer.finalize()?;

    // A compressed source re-encoded as PCM can come out bigger than what
    // we started with; in that case the trim bought nothing.
    let source_len = fs::metadata(source)?.len();
    let trimmed_len = fs::metadata(&out_path)?.len();
    if trimmed_len >= source_len {
        fs::remove_file(&out_path).ok();
        debug!(
            source_bytes = source_len,
            trimmed_bytes = trimmed_len,
            "trimmed encoding not smaller, keeping original"
        );
        return Ok(None);
    }

    debug!(
        source_bytes = source_len,
        trimmed_bytes = trimmed_len,
        kept_samples = trimmed.len(),
        total_samples = samples.len(),
        "trimmed silent edges"
    );
    Ok(Some(out_path))
}

fn trimmed_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    source.with_file_name(format!("{stem}-trim.wav"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    const RATE: u32 = 16_000;

    /// Leading silence, a speech burst, trailing silence.
    fn synthetic(lead_secs: f32, speech_secs: f32, tail_secs: f32) -> Vec<f32> {
        let mut samples = vec![0.0; (lead_secs * RATE as f32) as usize];
        let speech_len = (speech_secs * RATE as f32) as usize;
        for i in 0..speech_len {
            samples.push(if i % 2 == 0 { 0.4 } else { -0.4 });
        }
        samples.extend(vec![0.0; (tail_secs * RATE as f32) as usize]);
        samples
    }

    #[test]
    fn test_trims_leading_and_trailing_silence() {
        let samples = synthetic(1.0, 1.5, 1.0);
        let trimmed = trim_edges(&samples, RATE, 0.01, 0.15);

        // ~1.5s of speech plus 0.15s padding each side.
        let expected = ((1.5 + 0.3) * RATE as f32) as usize;
        assert!(trimmed.len() <= samples.len());
        assert!(
            (trimmed.len() as i64 - expected as i64).abs() < 64,
            "got {} expected ~{expected}",
            trimmed.len()
        );
    }

    #[test]
    fn test_all_silence_returned_unchanged() {
        let samples = vec![0.0; RATE as usize];
        let trimmed = trim_edges(&samples, RATE, 0.01, 0.15);
        assert_eq!(trimmed.len(), samples.len());
    }

    #[test]
    fn test_never_longer_never_empty() {
        let samples = synthetic(0.5, 0.2, 0.5);
        let trimmed = trim_edges(&samples, RATE, 0.01, 0.0);
        assert!(trimmed.len() <= samples.len());
        assert!(!trimmed.is_empty());
    }

    #[test]
    fn test_idempotent_on_trimmed_audio() {
        let samples = synthetic(1.0, 1.0, 1.0);
        let once = trim_edges(&samples, RATE, 0.01, 0.15);
        let twice = trim_edges(once, RATE, 0.01, 0.15);
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn test_speech_at_edges_untouched() {
        let mut samples = vec![0.5];
        samples.extend(vec![0.0; 1000]);
        samples.push(0.5);
        let trimmed = trim_edges(&samples, RATE, 0.01, 0.15);
        assert_eq!(trimmed.len(), samples.len());
    }

    fn write_wav(path: &Path, samples: &[f32]) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_trim_wav_file_shrinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_wav(&path, &synthetic(1.0, 1.5, 2.0));

        let trimmed = trim_wav_file(&path, &TrimConfig::default())
            .unwrap()
            .expect("should trim");
        let original = fs::metadata(&path).unwrap().len();
        let shrunk = fs::metadata(&trimmed).unwrap().len();
        assert!(shrunk < original);

        // Roughly the speech window plus padding survives.
        let (samples, _) = decode_wav_mono(&trimmed).unwrap();
        let expected = ((1.5 + 0.3) * RATE as f32) as usize;
        assert!(
            (samples.len() as i64 - expected as i64).abs() < 256,
            "got {} expected ~{expected}",
            samples.len()
        );
    }

    #[test]
    fn test_trim_wav_file_all_speech_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.wav");
        write_wav(&path, &synthetic(0.0, 1.0, 0.0));

        assert!(trim_wav_file(&path, &TrimConfig::default()).unwrap().is_none());
    }

    /// Full capture scenario: leading silence, speech, then enough
    /// trailing silence that the detector auto-stops; trimming the
    /// captured buffer then removes roughly the leading and trailing
    /// silence minus padding.
    #[test]
    fn test_auto_stop_then_trim_scenario() {
        use crate::detector::SilenceVoiceActivityDetector;
        use crate::meter::db_fs;
        use sotto_core::SilenceDetectorConfig;

        let signal = synthetic(1.0, 1.5, 2.0);
        let frame_len = RATE as usize * 90 / 1000;

        let config = SilenceDetectorConfig {
            ema_alpha: 1.0,
            ..SilenceDetectorConfig::default()
        };
        let mut detector = SilenceVoiceActivityDetector::new(config);

        let mut stop_at = None;
        for (i, frame) in signal.chunks(frame_len).enumerate() {
            let elapsed_ms = ((i + 1) * 90) as f64;
            let (stop, _) = detector.ingest(db_fs(frame), 90.0, elapsed_ms);
            if stop {
                stop_at = Some((i + 1) * frame_len);
                break;
            }
        }

        // Auto-stop fires during the trailing silence, before the
        // recording runs out: guard (1.2s) + accumulated silence (1.5s
        // past the 2.5s speech end) lands near 4.05s of 4.5s.
        let stop_at = stop_at.expect("should auto-stop in trailing silence");
        assert!(stop_at < signal.len());
        assert!(stop_at > (3.9 * RATE as f32) as usize);

        let captured = &signal[..stop_at];
        let trimmed = trim_edges(captured, RATE, 0.01, 0.15);
        let expected = ((1.5 + 0.3) * RATE as f32) as usize;
        assert!(
            (trimmed.len() as i64 - expected as i64).abs() < 128,
            "got {} expected ~{expected}",
            trimmed.len()
        );
    }

    #[test]
    fn test_trim_wav_file_undecodable_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-audio.wav");
        fs::write(&path, b"definitely not a wav").unwrap();

        assert!(trim_wav_file(&path, &TrimConfig::default()).unwrap().is_none());
    }
}
