//! Platform capture stack boundary.
//!
//! The capture service never touches an operating-system API directly. It
//! talks to four injectable trait objects bundled in [`Backend`]:
//!
//! - [`DeviceProvider`]: device discovery, the system-preferred camera,
//!   authorization, device configuration and rotation coordinators
//! - [`CaptureSessionGraph`]: the opaque session graph and its notifications
//! - [`PhotoOutput`] / [`MovieOutput`]: the two platform output objects
//!
//! Platform calls are synchronous. Asynchronous completions come back through
//! the delegate objects handed to the outputs and through `tokio` channels.

#[cfg(feature = "native")]
pub mod native;
pub mod simulated;

pub use simulated::{SessionSnapshot, SimulatedPlatform};

#[cfg(feature = "native")]
pub use native::NativeDeviceProvider;

use crate::errors::PlatformError;
use crate::output::movie::MovieRecordingDelegate;
use crate::output::photo::PhotoCaptureDelegate;
use crate::permissions::PermissionStatus;
use crate::types::{
    CaptureDevice, DeviceInput, DeviceUpdate, Dimensions, MediaType, MovieCodec, MovieSettings,
    OutputKind, PhotoCodec, PhotoSettings, RotationAngles, SessionNotification, SessionPreset,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Device discovery and per-device control.
pub trait DeviceProvider: Send + Sync {
    /// Every connected camera, in discovery order.
    fn video_devices(&self) -> Vec<CaptureDevice>;

    /// Every connected microphone; the first is the default.
    fn audio_devices(&self) -> Vec<CaptureDevice>;

    fn system_preferred_camera(&self) -> Option<CaptureDevice>;

    /// Emits whenever the system-preferred camera changes.
    fn watch_system_preferred_camera(&self) -> watch::Receiver<Option<CaptureDevice>>;

    fn set_user_preferred_camera(&self, device: &CaptureDevice);

    fn authorization_status(&self, media: MediaType) -> PermissionStatus;

    /// Prompts for access and returns the resulting status.
    fn request_access(&self, media: MediaType) -> PermissionStatus;

    /// Applies `update` while holding the device's configuration lock.
    fn configure_device(&self, device_id: &str, update: DeviceUpdate) -> Result<(), PlatformError>;

    /// Tracks preview and capture rotation angles for `device`.
    fn rotation_coordinator(&self, device: &CaptureDevice) -> watch::Receiver<RotationAngles>;
}

/// The platform's live capture graph.
pub trait CaptureSessionGraph: Send + Sync {
    fn begin_configuration(&self);
    fn commit_configuration(&self);
    fn set_preset(&self, preset: SessionPreset);
    fn can_add_input(&self, input: &DeviceInput) -> bool;
    fn add_input(&self, input: &DeviceInput);
    fn remove_input(&self, input: &DeviceInput);
    fn can_add_output(&self, output: OutputKind) -> bool;
    fn add_output(&self, output: OutputKind);
    fn remove_output(&self, output: OutputKind);
    fn has_output(&self, output: OutputKind) -> bool;
    fn start_running(&self);
    fn is_running(&self) -> bool;

    /// Interruption, interruption-ended, runtime-error and
    /// subject-area-changed notifications.
    fn notifications(&self) -> broadcast::Receiver<SessionNotification>;
}

pub trait PhotoOutput: Send + Sync {
    fn is_live_photo_capture_supported(&self) -> bool;
    fn is_live_photo_capture_enabled(&self) -> bool;
    fn set_live_photo_capture_enabled(&self, enabled: bool);
    fn is_pro_raw_supported(&self) -> bool;
    fn available_photo_codecs(&self) -> Vec<PhotoCodec>;
    fn set_max_photo_dimensions(&self, dimensions: Option<Dimensions>);
    fn set_rotation_angle(&self, angle: f64);

    /// Starts one capture. The delegate must eventually be finished (or
    /// dropped) exactly once.
    fn capture_photo(&self, settings: PhotoSettings, delegate: PhotoCaptureDelegate);
}

pub trait MovieOutput: Send + Sync {
    fn available_movie_codecs(&self) -> Vec<MovieCodec>;
    fn set_rotation_angle(&self, angle: f64);
    fn is_recording(&self) -> bool;
    fn start_recording(&self, settings: MovieSettings, delegate: MovieRecordingDelegate);

    /// Requests the recording to end; completion arrives through the delegate.
    fn stop_recording(&self);
}

/// The platform objects a capture service drives.
#[derive(Clone)]
pub struct Backend {
    pub devices: Arc<dyn DeviceProvider>,
    pub session: Arc<dyn CaptureSessionGraph>,
    pub photo_output: Arc<dyn PhotoOutput>,
    pub movie_output: Arc<dyn MovieOutput>,
}

impl Backend {
    /// Backend whose every component is the same in-memory platform.
    pub fn simulated(platform: Arc<SimulatedPlatform>) -> Self {
        Self {
            devices: platform.clone(),
            session: platform.clone(),
            photo_output: platform.clone(),
            movie_output: platform,
        }
    }
}

/// Begin/commit bracket around a session reconfiguration.
///
/// Commits on drop, so early returns and `?` still close the bracket.
pub struct ConfigurationBracket<'a> {
    session: &'a dyn CaptureSessionGraph,
}

impl<'a> ConfigurationBracket<'a> {
    pub fn begin(session: &'a dyn CaptureSessionGraph) -> Self {
        session.begin_configuration();
        Self { session }
    }
}

impl Drop for ConfigurationBracket<'_> {
    fn drop(&mut self) {
        self.session.commit_configuration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_commits_on_early_return() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());

        fn configure(session: &dyn CaptureSessionGraph) -> Result<(), PlatformError> {
            let _bracket = ConfigurationBracket::begin(session);
            Err(PlatformError::new("bail out"))
        }

        assert!(configure(platform.as_ref()).is_err());
        let snapshot = platform.session_snapshot();
        assert_eq!(snapshot.begin_count, 1);
        assert_eq!(snapshot.commit_count, 1);
        assert_eq!(snapshot.configuration_depth, 0);
    }
}
