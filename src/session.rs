//! Recording-session coordination.
//!
//! Owns the lifecycle of the single in-flight recording session and
//! arbitrates which trigger gets to stop it. The user releasing a hotkey,
//! the silence detector and the max-duration guard can all fire within
//! milliseconds of each other; whoever claims the stop first owns the
//! whole stop sequence and everyone else is refused.

use std::time::{Duration, Instant};

use sotto_audio::{AudioMeterSample, DetectorDebug, SilenceVoiceActivityDetector};
use sotto_core::{SessionPhase, SilenceDetectorConfig, StopTrigger};
use tracing::debug;

/// Result of feeding one meter sample through the detector.
#[derive(Debug, Clone, Copy)]
pub struct AutoStopDecision {
    /// Whether the session should auto-stop now
    pub should_auto_stop: bool,
    /// Detector internals, absent when evaluation was skipped
    pub debug: Option<DetectorDebug>,
}

impl AutoStopDecision {
    fn skipped() -> Self {
        Self {
            should_auto_stop: false,
            debug: None,
        }
    }
}

/// Serializes session lifecycle and stop arbitration.
///
/// All methods must be called from the same thread or behind one lock;
/// the single-owner discipline is what makes the stop-in-flight flag a
/// sufficient guard.
pub struct RecordingSessionCoordinator {
    phase: SessionPhase,
    detector: Option<SilenceVoiceActivityDetector>,
    started_at: Option<Instant>,
    stop_in_progress: bool,
    auto_stop_fired: bool,
}

impl RecordingSessionCoordinator {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            detector: None,
            started_at: None,
            stop_in_progress: false,
            auto_stop_fired: false,
        }
    }

    /// Start a new session: fresh detector, cleared stop flags, monotonic
    /// start time. Call exactly once per session before any stop or
    /// evaluate call.
    pub fn begin_session(&mut self, config: SilenceDetectorConfig) {
        self.phase = SessionPhase::Listening;
        self.detector = Some(SilenceVoiceActivityDetector::new(config));
        self.started_at = Some(Instant::now());
        self.stop_in_progress = false;
        self.auto_stop_fired = false;
    }

    /// Claim the stop sequence for `trigger`.
    ///
    /// Returns false if a stop is already in flight, or for a second
    /// auto-silence attempt in the same session. On true, the caller is
    /// the exclusive owner of the stop sequence.
    pub fn begin_stop(&mut self, trigger: StopTrigger) -> bool {
        if self.stop_in_progress {
            return false;
        }
        if trigger == StopTrigger::AutoSilence {
            if self.auto_stop_fired {
                return false;
            }
            self.auto_stop_fired = true;
        }
        self.stop_in_progress = true;
        debug!(trigger = trigger.as_str(), "stop sequence claimed");
        true
    }

    /// Give up a claimed stop after the capture-stop operation itself
    /// failed, so a later attempt can try again.
    pub fn abort_stop(&mut self) {
        self.stop_in_progress = false;
    }

    /// The session is over; clears stop bookkeeping and the start time.
    pub fn finish_stop(&mut self) {
        self.phase = SessionPhase::Idle;
        self.stop_in_progress = false;
        self.started_at = None;
    }

    /// Externally driven phase transition (e.g. capture stopped, now
    /// transcribing).
    pub fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Monotonic time since the session began, if one is active.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|started| started.elapsed())
    }

    /// Whether the recording has outlived the max-duration cap.
    pub fn exceeded_max_duration(&self, max: Duration) -> bool {
        if self.stop_in_progress || max.is_zero() {
            return false;
        }
        self.started_at.is_some_and(|started| started.elapsed() >= max)
    }

    /// Feed one meter sample to the silence detector.
    ///
    /// No-op while disabled, mid-stop, or without an active session. The
    /// detector's config is refreshed on every call so live settings
    /// changes apply without resetting accumulated state.
    pub fn evaluate_auto_stop(
        &mut self,
        sample: &AudioMeterSample,
        config: SilenceDetectorConfig,
    ) -> AutoStopDecision {
        if !config.enabled || self.stop_in_progress {
            return AutoStopDecision::skipped();
        }
        let Some(started_at) = self.started_at else {
            return AutoStopDecision::skipped();
        };
        let Some(detector) = self.detector.as_mut() else {
            return AutoStopDecision::skipped();
        };

        detector.update_config(config);
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        let frame_ms = sample.frame.as_secs_f64() * 1000.0;
        let (should_auto_stop, debug) = detector.ingest(sample.db, frame_ms, elapsed_ms);
        AutoStopDecision {
            should_auto_stop,
            debug: Some(debug),
        }
    }
}

impl Default for RecordingSessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector_config() -> SilenceDetectorConfig {
        SilenceDetectorConfig::default()
    }

    /// An always-eligible config so evaluation wiring can be tested
    /// without waiting out real guard time.
    fn instant_stop_config() -> SilenceDetectorConfig {
        SilenceDetectorConfig {
            start_guard_ms: 0,
            silence_duration_ms: 0,
            require_speech: false,
            ..SilenceDetectorConfig::default()
        }
    }

    fn quiet_sample() -> AudioMeterSample {
        AudioMeterSample {
            rms: 0.0,
            db: -80.0,
            frame: Duration::from_millis(90),
        }
    }

    #[test]
    fn test_auto_silence_claims_once_per_session() {
        let mut session = RecordingSessionCoordinator::new();
        session.begin_session(detector_config());

        assert!(session.begin_stop(StopTrigger::AutoSilence));
        session.finish_stop();
        // Auto-silence already fired this session; a second attempt is
        // refused even though no stop is in flight.
        assert!(!session.begin_stop(StopTrigger::AutoSilence));
        // Manual stop is still allowed.
        assert!(session.begin_stop(StopTrigger::Manual));

        // A new session resets the one-shot.
        session.finish_stop();
        session.begin_session(detector_config());
        assert!(session.begin_stop(StopTrigger::AutoSilence));
    }

    #[test]
    fn test_only_one_stop_in_flight() {
        let mut session = RecordingSessionCoordinator::new();
        session.begin_session(detector_config());

        assert!(session.begin_stop(StopTrigger::Manual));
        assert!(!session.begin_stop(StopTrigger::Manual));
        assert!(!session.begin_stop(StopTrigger::MaxDuration));
    }

    #[test]
    fn test_abort_allows_retry() {
        let mut session = RecordingSessionCoordinator::new();
        session.begin_session(detector_config());

        assert!(session.begin_stop(StopTrigger::Manual));
        session.abort_stop();
        assert!(session.begin_stop(StopTrigger::Manual));
    }

    #[test]
    fn test_evaluate_skipped_when_disabled_or_stopping() {
        let mut session = RecordingSessionCoordinator::new();
        session.begin_session(instant_stop_config());

        let mut disabled = instant_stop_config();
        disabled.enabled = false;
        let decision = session.evaluate_auto_stop(&quiet_sample(), disabled);
        assert!(!decision.should_auto_stop);
        assert!(decision.debug.is_none());

        session.begin_stop(StopTrigger::Manual);
        let decision = session.evaluate_auto_stop(&quiet_sample(), instant_stop_config());
        assert!(!decision.should_auto_stop);
        assert!(decision.debug.is_none());
    }

    #[test]
    fn test_evaluate_skipped_without_session() {
        let mut session = RecordingSessionCoordinator::new();
        let decision = session.evaluate_auto_stop(&quiet_sample(), instant_stop_config());
        assert!(!decision.should_auto_stop);
        assert!(decision.debug.is_none());
    }

    #[test]
    fn test_evaluate_reaches_detector() {
        let mut session = RecordingSessionCoordinator::new();
        session.begin_session(instant_stop_config());

        let decision = session.evaluate_auto_stop(&quiet_sample(), instant_stop_config());
        assert!(decision.should_auto_stop);
        assert!(decision.debug.is_some());
    }

    #[test]
    fn test_max_duration_guard() {
        let mut session = RecordingSessionCoordinator::new();
        assert!(!session.exceeded_max_duration(Duration::from_secs(1)));

        session.begin_session(detector_config());
        std::thread::sleep(Duration::from_millis(5));
        assert!(session.exceeded_max_duration(Duration::from_millis(1)));
        assert!(!session.exceeded_max_duration(Duration::from_secs(3600)));
        // Zero cap means no cap.
        assert!(!session.exceeded_max_duration(Duration::ZERO));

        // Mid-stop the guard is quiet.
        session.begin_stop(StopTrigger::MaxDuration);
        assert!(!session.exceeded_max_duration(Duration::from_millis(1)));
    }

    #[test]
    fn test_phase_transitions() {
        let mut session = RecordingSessionCoordinator::new();
        assert_eq!(session.phase(), SessionPhase::Idle);
        session.begin_session(detector_config());
        assert_eq!(session.phase(), SessionPhase::Listening);
        session.set_phase(SessionPhase::Transcribing);
        assert_eq!(session.phase(), SessionPhase::Transcribing);
        session.finish_stop();
        assert_eq!(session.phase(), SessionPhase::Idle);
    }
}
