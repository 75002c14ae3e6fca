use crate::defaults;
use crate::error::{Result, VoxlinkError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub meter: MeterConfig,
}

/// Microphone capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub device: Option<String>,
    /// Rate of outgoing chunks on the wire.
    pub target_rate: u32,
    /// Native samples accumulated per outgoing chunk.
    pub block_size: usize,
    /// Samples kept for the level meter.
    pub analysis_window: usize,
}

/// Speaker playback and jitter buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub device: Option<String>,
    /// Rate of incoming chunks on the wire.
    pub sample_rate: u32,
    pub prebuffer_chunks: usize,
    pub lookahead_chunks: usize,
    pub rebuffer_threshold: usize,
    pub rebuffer_hysteresis: usize,
    pub stale_after_ms: u64,
    /// Queue capacity in chunks; 0 leaves the queue unbounded.
    pub max_queued_chunks: usize,
    pub volume: f32,
}

/// Level meter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MeterConfig {
    pub poll_interval_ms: u64,
    pub scale: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            target_rate: defaults::CAPTURE_SAMPLE_RATE,
            block_size: defaults::CAPTURE_BLOCK_SIZE,
            analysis_window: defaults::ANALYSIS_WINDOW,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            prebuffer_chunks: defaults::PREBUFFER_CHUNKS,
            lookahead_chunks: defaults::LOOKAHEAD_CHUNKS,
            rebuffer_threshold: defaults::REBUFFER_THRESHOLD,
            rebuffer_hysteresis: defaults::REBUFFER_HYSTERESIS,
            stale_after_ms: defaults::STALE_SCHEDULE_MS,
            max_queued_chunks: defaults::MAX_QUEUED_CHUNKS,
            volume: 1.0,
        }
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::LEVEL_POLL_MS,
            scale: defaults::LEVEL_SCALE,
        }
    }
}

impl MeterConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(VoxlinkError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(VoxlinkError::Config(e)) => Err(VoxlinkError::ConfigParse {
                message: format!("{}: {}", path.display(), e),
            }),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXLINK_INPUT_DEVICE → capture.device
    /// - VOXLINK_OUTPUT_DEVICE → playback.device
    /// - VOXLINK_PREBUFFER → playback.prebuffer_chunks (ignored unless a number)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("VOXLINK_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.capture.device = Some(device);
        }

        if let Ok(device) = std::env::var("VOXLINK_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.playback.device = Some(device);
        }

        if let Ok(prebuffer) = std::env::var("VOXLINK_PREBUFFER") {
            match prebuffer.trim().parse::<usize>() {
                Ok(chunks) => self.playback.prebuffer_chunks = chunks,
                Err(_) if prebuffer.is_empty() => {}
                Err(_) => tracing::warn!("ignoring non-numeric VOXLINK_PREBUFFER={prebuffer:?}"),
            }
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxlink/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("voxlink").join("config.toml"))
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: impl Into<String>) -> Result<()> {
            Err(VoxlinkError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.into(),
            })
        }

        if self.capture.target_rate == 0 {
            return invalid("capture.target_rate", "must be greater than 0");
        }
        if self.capture.block_size == 0 {
            return invalid("capture.block_size", "must be greater than 0");
        }
        if self.playback.sample_rate == 0 {
            return invalid("playback.sample_rate", "must be greater than 0");
        }
        if self.playback.lookahead_chunks == 0 {
            return invalid("playback.lookahead_chunks", "must be at least 1");
        }
        let resume = self.playback.rebuffer_threshold + self.playback.rebuffer_hysteresis;
        if self.playback.prebuffer_chunks < resume {
            return invalid(
                "playback.prebuffer_chunks",
                format!(
                    "must be at least rebuffer_threshold + rebuffer_hysteresis ({})",
                    resume
                ),
            );
        }
        if !(0.0..=1.0).contains(&self.playback.volume) {
            return invalid("playback.volume", "must be between 0.0 and 1.0");
        }
        if !self.meter.scale.is_finite() || self.meter.scale <= 0.0 {
            return invalid("meter.scale", "must be a positive number");
        }
        Ok(())
    }

    /// Serialize back to TOML, e.g. for `config dump`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VoxlinkError::ConfigParse {
            message: e.to_string(),
        })
    }
}
