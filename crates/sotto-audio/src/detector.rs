//! Auto-stop silence detection.
//!
//! Per-session state machine fed by meter samples. An exponential moving
//! average smooths instantaneous dB readings so single-frame impulse noise
//! neither triggers the speech gate nor resets the silence accumulator.

use sotto_core::SilenceDetectorConfig;

/// Snapshot of detector internals returned with every verdict, for
/// logging and tests.
#[derive(Debug, Clone, Copy)]
pub struct DetectorDebug {
    /// Smoothed level after this sample
    pub ema_db: f32,
    /// Whether speech has been observed this session
    pub has_spoken: bool,
    /// Whether the start-guard period has elapsed
    pub guard_passed: bool,
    /// Accumulated sustained silence (ms)
    pub silence_accum_ms: f64,
}

/// Stateful per-session voice-activity detector.
///
/// Mutated only by [`ingest`](Self::ingest); state survives config
/// refreshes and resets only when a new session starts.
#[derive(Debug)]
pub struct SilenceVoiceActivityDetector {
    config: SilenceDetectorConfig,
    ema_db: f32,
    initialized: bool,
    has_spoken: bool,
    silence_accum_ms: f64,
}

impl SilenceVoiceActivityDetector {
    /// Fresh detector for a new session.
    pub fn new(config: SilenceDetectorConfig) -> Self {
        Self {
            config,
            ema_db: 0.0,
            initialized: false,
            has_spoken: false,
            silence_accum_ms: 0.0,
        }
    }

    /// Replace the config without touching accumulated state, so live
    /// settings changes apply mid-session.
    pub fn update_config(&mut self, config: SilenceDetectorConfig) {
        self.config = config;
    }

    /// Whether the speech gate has been satisfied this session.
    pub fn has_spoken(&self) -> bool {
        self.has_spoken
    }

    /// Feed one meter sample.
    ///
    /// `db_instant` is the frame's instantaneous level, `frame_ms` the span
    /// of audio it covers, and `elapsed_ms` the recording's age. Returns
    /// whether the session should auto-stop now.
    pub fn ingest(
        &mut self,
        db_instant: f32,
        frame_ms: f64,
        elapsed_ms: f64,
    ) -> (bool, DetectorDebug) {
        let alpha = self.config.alpha();
        self.ema_db = if self.initialized {
            (1.0 - alpha) * self.ema_db + alpha * db_instant
        } else {
            self.initialized = true;
            db_instant
        };

        // Monotonic within a session.
        if self.ema_db >= self.config.speech_activate_db {
            self.has_spoken = true;
        }

        let guard_passed = elapsed_ms >= self.config.start_guard_ms as f64;
        let speech_ready = !self.config.require_speech || self.has_spoken;

        if guard_passed && speech_ready {
            if self.ema_db < self.config.silence_threshold_db {
                self.silence_accum_ms += frame_ms;
            } else {
                self.silence_accum_ms = 0.0;
            }
        } else {
            // No silence credit accrues before the guard or before speech.
            self.silence_accum_ms = 0.0;
        }

        let should_auto_stop = guard_passed
            && speech_ready
            && self.silence_accum_ms >= self.config.silence_duration_ms as f64;

        (
            should_auto_stop,
            DetectorDebug {
                ema_db: self.ema_db,
                has_spoken: self.has_spoken,
                guard_passed,
                silence_accum_ms: self.silence_accum_ms,
            },
        )
    }
}
