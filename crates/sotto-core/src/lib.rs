//! Core types and configuration for sotto.
//!
//! This crate provides platform-agnostic types shared by all sotto
//! sub-crates: the persisted configuration and the recording-session
//! state vocabulary.

mod config;
mod session;

pub use config::{
    Config, ConfigManager, RealtimeTuning, SilenceDetectorConfig, Transport, TrimConfig,
};
pub use session::{SessionPhase, StopTrigger};

/// Application name
pub const APP_NAME: &str = "sotto";

/// Pretty application name for display
pub const APP_NAME_PRETTY: &str = "Sotto";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
