//! Shutterbug: a capture-service coordinator for camera applications
//!
//! One [`CaptureService`] owns the capture session and everything wired into
//! it: the active camera and microphone, the photo and movie outputs, the
//! rotation coordinator and the session's notifications. The operating
//! system's capture stack sits behind the traits in [`platform`], so the
//! same service runs against real hardware or the in-memory
//! [`SimulatedPlatform`].
//!
//! # Features
//! - Session setup with rollback of partially attached inputs and outputs
//! - Photo/video mode switching, HDR video and live-photo preferences
//! - Camera cycling and system-preferred camera tracking
//! - Interruption and media-services-reset recovery
//! - Tap-to-focus with preview-to-device coordinate conversion
//! - Photo and movie captures that each resolve exactly once
//!
//! # Usage
//! ```rust,no_run
//! use shutterbug::{Backend, CaptureService, ShutterbugConfig, SimulatedPlatform};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), shutterbug::CaptureError> {
//! let config = ShutterbugConfig::default();
//! let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
//! let service = CaptureService::new(Backend::simulated(platform), config.clone());
//!
//! service.start(config.capture.camera_state()).await?;
//! let photo = service.capture_photo(config.capture.camera_state().photo_features()).await?;
//! println!("captured {} bytes", photo.data.len());
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod devices;
pub mod errors;
pub mod geometry;
pub mod invariants;
pub mod output;
pub mod permissions;
pub mod platform;
pub mod service;
pub mod timing;
pub mod types;

// Testing utilities - fixtures and synthetic photo data for offline runs
pub mod testing;

// Re-exports for convenience
pub use config::ShutterbugConfig;
pub use errors::{CaptureError, ConfigError, PlatformError};
pub use permissions::PermissionStatus;
pub use platform::{Backend, SimulatedPlatform};
pub use service::CaptureService;
pub use types::{
    CameraState, CaptureActivity, CaptureCapabilities, CaptureDevice, CaptureMode, Movie, Photo,
    PhotoFeatures, Point,
};

/// Initialize logging, using `default_level` when `RUST_LOG` is unset
pub fn init_logging(default_level: &str) {
    let filter = format!("shutterbug={}", default_level);
    let env = env_logger::Env::default().default_filter_or(filter);
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        native_discovery: cfg!(feature = "native"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Whether this build can enumerate real cameras
    pub native_discovery: bool,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "shutterbug");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        init_logging("debug");
        init_logging("info");
    }
}
