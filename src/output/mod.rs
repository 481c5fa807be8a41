//! Output services: per-media-type wrappers around the platform outputs.

pub mod movie;
pub mod photo;

pub use movie::{MovieOutputService, MovieRecordingDelegate};
pub use photo::{PhotoCaptureDelegate, PhotoOutputService};

use crate::types::{CaptureActivity, CaptureCapabilities, CaptureDevice, OutputKind};
use tokio::sync::watch;

/// Capability set shared by the photo and movie output services.
pub trait OutputService: Send + Sync {
    fn kind(&self) -> OutputKind;

    /// Current activity of this output.
    fn activity(&self) -> watch::Receiver<CaptureActivity>;

    fn capabilities(&self) -> CaptureCapabilities;

    fn set_video_rotation_angle(&self, angle: f64);

    /// Adapt output settings to a newly active camera.
    fn update_configuration(&self, device: &CaptureDevice);
}
