//! Configuration management for shutterbug
//!
//! Supplies the capture feature flags the service starts with, the storage
//! location for movies and live-photo companions, and the default log level.

use crate::errors::ConfigError;
use crate::types::{CameraState, CaptureMode, QualityPrioritization};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutterbugConfig {
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Capture feature flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Mode the session starts in
    pub default_mode: CaptureMode,
    /// Prefer 10-bit HDR formats when recording video
    pub hdr_video: bool,
    /// Capture a companion movie with each photo when supported
    pub live_photo: bool,
    /// Prefer pro-RAW stills when the output supports them
    pub pro_raw: bool,
    pub quality_prioritization: QualityPrioritization,
    /// Attach the default microphone during setup
    pub record_audio: bool,
}

/// Where finished movies and live-photo companions are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub output_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_mode: CaptureMode::Photo,
            hdr_video: false,
            live_photo: true,
            pro_raw: false,
            quality_prioritization: QualityPrioritization::Balanced,
            record_audio: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_directory: std::env::temp_dir().join("shutterbug"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CaptureConfig {
    /// Start-up feature bundle derived from these flags.
    pub fn camera_state(&self) -> CameraState {
        CameraState {
            capture_mode: self.default_mode,
            is_video_hdr_enabled: self.hdr_video,
            is_live_photo_enabled: self.live_photo,
            is_pro_raw_enabled: self.pro_raw,
            quality_prioritization: self.quality_prioritization,
        }
    }
}

impl ShutterbugConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: ShutterbugConfig = toml::from_str(&contents)?;
        config.validate()?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("shutterbug.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.output_directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.output_directory must not be empty".to_string(),
            ));
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !["off", "error", "warn", "info", "debug", "trace"].contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown logging.level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShutterbugConfig::default();
        assert_eq!(config.capture.default_mode, CaptureMode::Photo);
        assert!(config.capture.live_photo);
        assert!(config.capture.record_audio);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad_level = ShutterbugConfig::default();
        bad_level.logging.level = "loud".to_string();
        assert!(matches!(bad_level.validate(), Err(ConfigError::Invalid(_))));

        let mut bad_dir = ShutterbugConfig::default();
        bad_dir.storage.output_directory = PathBuf::new();
        assert!(bad_dir.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("shutterbug.toml");

        let mut config = ShutterbugConfig::default();
        config.capture.default_mode = CaptureMode::Video;
        config.capture.hdr_video = true;
        config.save_to_file(&path).unwrap();

        let loaded = ShutterbugConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.capture.default_mode, CaptureMode::Video);
        assert!(loaded.capture.hdr_video);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&ShutterbugConfig::default()).unwrap();
        assert!(toml_string.contains("[capture]"));
        assert!(toml_string.contains("[storage]"));
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("default_mode = \"photo\""));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: ShutterbugConfig = toml::from_str("[capture]\nhdr_video = true\n").unwrap();
        assert!(config.capture.hdr_video);
        assert!(config.capture.live_photo);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ShutterbugConfig::load_from_file("definitely_missing_shutterbug.toml");
        assert_eq!(result.unwrap().capture.default_mode, CaptureMode::Photo);
    }

    #[test]
    fn test_camera_state_from_flags() {
        let mut capture = CaptureConfig::default();
        capture.pro_raw = true;
        let state = capture.camera_state();
        assert!(state.is_pro_raw_enabled);
        assert!(state.photo_features().is_pro_raw_enabled);
    }
}
