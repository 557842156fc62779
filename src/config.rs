//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory; every
//! field falls back to a sensible default so a missing or partial file
//! is never fatal.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::Error;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub link: LinkConfig,
}

/// Audio format settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// PCM sample rate
    pub sample_rate: u32,
    /// Channel count (the link carries mono voice by default)
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: constants::SAMPLE_RATE,
            channels: constants::CHANNELS,
        }
    }
}

/// Link and lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Explicit channel used when service-record lookup fails
    pub fallback_channel: u8,
    /// Grace period in milliseconds before stop() force-closes the link
    pub stop_grace_ms: u64,
    /// Backoff in milliseconds after an empty capture read
    pub capture_retry_ms: u64,
    /// Base TCP port used by the development transport
    pub tcp_base_port: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            fallback_channel: constants::FALLBACK_CHANNEL,
            stop_grace_ms: constants::STOP_GRACE.as_millis() as u64,
            capture_retry_ms: constants::CAPTURE_RETRY_BACKOFF.as_millis() as u64,
            tcp_base_port: 7850,
        }
    }
}

impl LinkConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn capture_retry(&self) -> Duration {
        Duration::from_millis(self.capture_retry_ms)
    }
}

/// Path of the config file, if a platform config directory exists
pub fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "voicelink")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl AppConfig {
    /// Load the configuration, falling back to defaults when no file
    /// is present.
    pub fn load() -> crate::Result<Self> {
        let Some(path) = config_path() else {
            return Ok(Self::default());
        };
        Self::load_from(&path)
    }

    /// Load from an explicit path; a missing file yields the defaults.
    pub fn load_from(path: &std::path::Path) -> crate::Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config file at {}; using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))
    }
}
