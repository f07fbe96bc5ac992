//! Configuration management for sotto.
//!
//! This module provides core configuration that doesn't depend on
//! platform-specific UI libraries. Detector and trim settings are nested
//! tables so a settings surface can refresh them mid-session.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::APP_NAME;

/// Which transcription transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Chunked multipart upload with incremental server-sent events
    #[default]
    Upload,
    /// WebSocket realtime protocol with raw PCM framing
    Realtime,
}

/// Core configuration structure for the application.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// OpenAI API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,

    /// Preferred language for transcription (ISO 639-1 code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Model to use for transcriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Optional vocabulary/context prompt sent with each request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Transcription transport
    #[serde(default)]
    pub transport: Transport,

    /// Discard recordings under this duration (in seconds)
    #[serde(
        default = "default_discard_duration",
        skip_serializing_if = "is_default_discard_duration"
    )]
    pub discard_duration: f32,

    /// Hard cap on recording length (in seconds)
    #[serde(
        default = "default_max_recording",
        skip_serializing_if = "is_default_max_recording"
    )]
    pub max_recording_secs: f32,

    /// Auto-stop silence detection
    #[serde(default)]
    pub silence: SilenceDetectorConfig,

    /// Edge-silence trimming before upload
    #[serde(default)]
    pub trim: TrimConfig,

    /// Realtime transport tuning
    #[serde(default)]
    pub realtime: RealtimeTuning,
}

/// Tuning for the auto-stop silence detector.
///
/// Supplied fresh at session start and may be refreshed mid-session without
/// resetting the detector's accumulated state.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SilenceDetectorConfig {
    /// Whether auto-stop is enabled at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Smoothed level below this (dBFS) counts as silence
    #[serde(default = "default_silence_threshold_db")]
    pub silence_threshold_db: f32,

    /// Sustained silence required before auto-stop (ms)
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u64,

    /// No silence credit accrues this early in the recording (ms)
    #[serde(default = "default_start_guard_ms")]
    pub start_guard_ms: u64,

    /// Never auto-stop a session in which the user hasn't spoken
    #[serde(default = "default_true")]
    pub require_speech: bool,

    /// Smoothed level at or above this (dBFS) counts as speech
    #[serde(default = "default_speech_activate_db")]
    pub speech_activate_db: f32,

    /// EMA smoothing factor, clamped to (0, 1]
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f32,
}

impl Default for SilenceDetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            silence_threshold_db: default_silence_threshold_db(),
            silence_duration_ms: default_silence_duration_ms(),
            start_guard_ms: default_start_guard_ms(),
            require_speech: true,
            speech_activate_db: default_speech_activate_db(),
            ema_alpha: default_ema_alpha(),
        }
    }
}

impl SilenceDetectorConfig {
    /// EMA factor with the (0, 1] bound enforced.
    pub fn alpha(&self) -> f32 {
        if self.ema_alpha.is_finite() && self.ema_alpha > 0.0 {
            self.ema_alpha.min(1.0)
        } else {
            default_ema_alpha()
        }
    }
}

/// Tuning for edge-silence trimming.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TrimConfig {
    /// Whether to attempt trimming before upload
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Normalized amplitude above which a sample counts as speech
    #[serde(default = "default_amplitude_threshold")]
    pub amplitude_threshold: f32,

    /// Padding kept on each side of the detected speech window (seconds)
    #[serde(default = "default_trim_padding")]
    pub padding_seconds: f32,

    /// Recordings shorter than this aren't worth the trim overhead (seconds)
    #[serde(default = "default_trim_min_duration")]
    pub min_duration_secs: f32,

    /// Higher floor for compressed sources, which cost more to re-decode
    #[serde(default = "default_trim_min_compressed")]
    pub min_compressed_duration_secs: f32,

    /// Time budget for the trim attempt (ms); a slow trim loses the race
    #[serde(default = "default_trim_budget_ms")]
    pub budget_ms: u64,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            amplitude_threshold: default_amplitude_threshold(),
            padding_seconds: default_trim_padding(),
            min_duration_secs: default_trim_min_duration(),
            min_compressed_duration_secs: default_trim_min_compressed(),
            budget_ms: default_trim_budget_ms(),
        }
    }
}

impl TrimConfig {
    /// Trim time budget as a Duration.
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

/// Server-side tuning for the realtime transport.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RealtimeTuning {
    /// Server VAD: silence that ends a turn (ms)
    #[serde(default = "default_rt_silence_ms")]
    pub silence_duration_ms: u32,

    /// Server VAD: audio kept before detected speech (ms)
    #[serde(default = "default_rt_prefix_ms")]
    pub prefix_padding_ms: u32,

    /// Hard end-to-end timeout for a realtime attempt (seconds)
    #[serde(default = "default_rt_timeout_secs")]
    pub hard_timeout_secs: u64,
}

impl Default for RealtimeTuning {
    fn default() -> Self {
        Self {
            silence_duration_ms: default_rt_silence_ms(),
            prefix_padding_ms: default_rt_prefix_ms(),
            hard_timeout_secs: default_rt_timeout_secs(),
        }
    }
}

impl RealtimeTuning {
    /// Hard timeout as a Duration.
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_discard_duration() -> f32 {
    0.5
}

fn is_default_discard_duration(v: &f32) -> bool {
    (*v - 0.5).abs() < f32::EPSILON
}

fn default_max_recording() -> f32 {
    120.0
}

fn is_default_max_recording(v: &f32) -> bool {
    (*v - 120.0).abs() < f32::EPSILON
}

fn default_silence_threshold_db() -> f32 {
    -45.0
}

fn default_silence_duration_ms() -> u64 {
    1500
}

fn default_start_guard_ms() -> u64 {
    1200
}

fn default_speech_activate_db() -> f32 {
    -35.0
}

fn default_ema_alpha() -> f32 {
    0.35
}

fn default_amplitude_threshold() -> f32 {
    0.012
}

fn default_trim_padding() -> f32 {
    0.15
}

fn default_trim_min_duration() -> f32 {
    1.2
}

fn default_trim_min_compressed() -> f32 {
    3.0
}

fn default_trim_budget_ms() -> u64 {
    350
}

fn default_rt_silence_ms() -> u32 {
    500
}

fn default_rt_prefix_ms() -> u32 {
    300
}

fn default_rt_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_key: None,
            language: None,
            model: None,
            prompt: None,
            transport: Transport::default(),
            discard_duration: default_discard_duration(),
            max_recording_secs: default_max_recording(),
            silence: SilenceDetectorConfig::default(),
            trim: TrimConfig::default(),
            realtime: RealtimeTuning::default(),
        }
    }
}

impl Config {
    /// Get the OpenAI API key
    pub fn key_openai(&self) -> Option<&str> {
        self.openai_key.as_deref()
    }

    /// Get the preferred language
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Get the model name
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Get the vocabulary prompt
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    /// Get the discard duration as a Duration
    pub fn discard_duration(&self) -> Duration {
        Duration::from_secs_f32(self.discard_duration.max(0.0))
    }

    /// Get the maximum recording duration as a Duration
    pub fn max_recording(&self) -> Duration {
        Duration::from_secs_f32(self.max_recording_secs.max(0.0))
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the default configuration directory.
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Creates a new ConfigManager with a specified configuration directory.
    #[cfg(test)]
    pub fn with_config_dir<P: AsRef<std::path::Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Loads the configuration from the config file or returns default.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file at {:?}", self.config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))?;

        if config.key_openai().is_none() {
            warn!("OpenAI API key is not set. Transcriptions will not work without it.");
        }

        Ok(config)
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.openai_key.is_none());
        assert_eq!(config.transport, Transport::Upload);
        assert!(config.silence.enabled);
        assert!(config.silence.require_speech);
        assert_eq!(config.silence.silence_duration_ms, 1500);
        assert!(config.trim.enabled);
        assert_eq!(config.discard_duration, 0.5);
        assert_eq!(config.max_recording_secs, 120.0);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config {
            openai_key: Some("test-key".to_string()),
            model: Some("gpt-4o-mini-transcribe".to_string()),
            transport: Transport::Realtime,
            ..Default::default()
        };

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(config.openai_key, deserialized.openai_key);
        assert_eq!(config.model, deserialized.model);
        assert_eq!(config.transport, deserialized.transport);
    }

    #[test]
    fn test_partial_silence_table_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [silence]
            silence_threshold_db = -50.0
            "#,
        )
        .unwrap();

        assert_eq!(config.silence.silence_threshold_db, -50.0);
        assert_eq!(config.silence.start_guard_ms, 1200);
        assert!(config.silence.require_speech);
    }

    #[test]
    fn test_alpha_clamped() {
        let mut silence = SilenceDetectorConfig::default();
        silence.ema_alpha = 0.0;
        assert!(silence.alpha() > 0.0);
        silence.ema_alpha = 7.0;
        assert_eq!(silence.alpha(), 1.0);
        silence.ema_alpha = 0.25;
        assert_eq!(silence.alpha(), 0.25);
    }

    #[test]
    fn test_config_manager_save_load() {
        let temp_dir = tempfile::tempdir().unwrap();

        let manager = ConfigManager::with_config_dir(temp_dir.path());

        let config = Config {
            openai_key: Some("test-key".to_string()),
            ..Default::default()
        };

        manager.save(&config).unwrap();
        let loaded = manager.load().unwrap();

        assert_eq!(config.openai_key, loaded.openai_key);
    }
}
