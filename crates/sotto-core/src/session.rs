//! Recording-session state vocabulary.

/// The phase of the single in-flight recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session active
    #[default]
    Idle,
    /// Actively capturing audio
    Listening,
    /// Capture finished, transcription in flight
    Transcribing,
}

/// What asked the session to stop.
///
/// Stop requests race: the user releasing the hotkey, the silence detector,
/// and the max-duration guard can all fire close together. The session
/// coordinator accepts exactly one of them per stop sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    /// User-initiated stop
    Manual,
    /// Silence detector decided the utterance ended
    AutoSilence,
    /// Recording hit the configured maximum duration
    MaxDuration,
}

impl StopTrigger {
    /// Short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoSilence => "auto-silence",
            Self::MaxDuration => "max-duration",
        }
    }
}
