// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::FacingMode;
use crate::constants::{
    APP_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_CAPTURE_HEIGHT, DEFAULT_CAPTURE_WIDTH,
    DEFAULT_COOLDOWN, DEFAULT_DECODER_MAX_DIMENSION,
};
use crate::errors::ConfigError;
use crate::frame_processor::DecoderKind;
use crate::session::SessionOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// User configuration, stored as JSON
///
/// Missing fields take their default value, so older files keep loading.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Duplicate-suppression window after each forwarded scan
    pub cooldown_ms: u64,
    /// Requested capture resolution width
    pub capture_width: u32,
    /// Requested capture resolution height
    pub capture_height: u32,
    /// Preferred camera facing (ignored by V4L2)
    pub facing: FacingMode,
    /// Last used camera device id
    pub last_device_id: Option<String>,
    /// Ring the terminal bell on each forwarded scan
    pub beep_on_scan: bool,
    /// Release the camera when the decoder fails
    pub release_on_decoder_error: bool,
    /// Symbologies to look for
    pub decoder: DecoderKind,
    /// Frames are downscaled to this size before decoding
    pub decoder_max_dimension: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cooldown_ms: DEFAULT_COOLDOWN.as_millis() as u64,
            capture_width: DEFAULT_CAPTURE_WIDTH,
            capture_height: DEFAULT_CAPTURE_HEIGHT,
            facing: FacingMode::default(),
            last_device_id: None,
            beep_on_scan: true,
            release_on_decoder_error: false,
            decoder: DecoderKind::default(),
            decoder_max_dimension: DEFAULT_DECODER_MAX_DIMENSION,
        }
    }
}

impl Config {
    /// Default location: `<config dir>/scanner/config.json`
    pub fn path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = serde_json::from_str(&contents)?;
                debug!(path = %path.display(), "Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Session tunables derived from this configuration
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            cooldown: self.cooldown(),
            capture_width: self.capture_width,
            capture_height: self.capture_height,
            facing: self.facing,
            release_on_decoder_error: self.release_on_decoder_error,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        config.session_options()
    }
}
