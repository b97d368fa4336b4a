//! Configuration loading and resolution
//!
//! Configuration comes from a single TOML file. Every field has a built-in
//! default, so an empty file (or no file at all) is a valid configuration.
//!
//! # Resolution order
//!
//! 1. Path given on the command line (highest priority)
//! 2. `DPLAY_CONFIG` environment variable
//! 3. Per-user config file (`<config_dir>/dplay/config.toml`)
//! 4. Built-in defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DPLAY_CONFIG";

/// Complete player configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub audio: AudioSettings,
    pub logging: LoggingConfig,
}

/// Audio pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Output device name (None = default device)
    pub device: Option<String>,

    /// Packet queue bound (0 = unbounded)
    pub packet_queue_capacity: usize,

    /// Resampling kernel used when the source rate is not 44.1kHz
    pub resampler: ResamplerQuality,

    /// Frame size hint used when the codec does not report one
    pub default_frame_size: usize,

    /// Number of PCM buffers the output device may hold
    pub buffer_queue_depth: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            device: None,
            packet_queue_capacity: 64,
            resampler: ResamplerQuality::Fast,
            default_frame_size: 1152,
            buffer_queue_depth: 2,
        }
    }
}

/// Resampler kernel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerQuality {
    /// Septic polynomial interpolation (low CPU)
    #[default]
    Fast,
    /// Windowed sinc interpolation (highest quality)
    Sinc,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PlayerConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit file. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve configuration following the documented priority order.
    ///
    /// Only the per-user file is optional; a path named on the command line
    /// or in the environment must exist and parse.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_path {
            return Self::load(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Self::load(Path::new(&path));
            }
        }

        // Priority 3: Per-user config file
        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::load(&path);
            }
            debug!("No config file at {}, using defaults", path.display());
        }

        // Priority 4: Built-in defaults
        Ok(Self::default())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.audio.default_frame_size == 0 {
            return Err(Error::Config(
                "audio.default_frame_size must be greater than zero".to_string(),
            ));
        }
        if self.audio.buffer_queue_depth == 0 {
            return Err(Error::Config(
                "audio.buffer_queue_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get the per-user configuration file path for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dplay").join("config.toml"))
}
