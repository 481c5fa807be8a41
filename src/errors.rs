use thiserror::Error;

/// Errors surfaced by the capture service and its output helpers.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Video device unavailable")]
    VideoDeviceUnavailable,
    #[error("Audio device unavailable")]
    AudioDeviceUnavailable,
    #[error("Unable to add input for device: {0}")]
    AddInputFailed(String),
    #[error("Unable to add {0} output")]
    AddOutputFailed(String),
    #[error("Capture session setup failed")]
    SetupFailed(#[source] Box<CaptureError>),
    #[error("Device change failed: {0}")]
    DeviceChangeFailed(String),
    #[error("No photo data was produced")]
    NoPhotoData,
    #[error("Capture configuration failed: {0}")]
    ConfigurationFailed(String),
    #[error("Camera or microphone access is not authorized")]
    Unauthorized,
    #[error("Live photo capture is not supported by this output")]
    NoLivePhotoSupport,
    #[error("Capture failed: {0}")]
    CaptureFailed(String),
}

impl CaptureError {
    pub fn setup(cause: CaptureError) -> Self {
        CaptureError::SetupFailed(Box::new(cause))
    }
}

/// Failure reported by a platform call or delegate callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PlatformError {
    pub message: String,
}

impl PlatformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<PlatformError> for CaptureError {
    fn from(error: PlatformError) -> Self {
        CaptureError::CaptureFailed(error.message)
    }
}

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
