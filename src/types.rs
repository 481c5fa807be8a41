//! Value types shared by the capture service, its output helpers and the
//! platform boundary.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Which output is attached to the session and which preset is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Photo,
    Video,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Photo => write!(f, "photo"),
            CaptureMode::Video => write!(f, "video"),
        }
    }
}

/// What the active output is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum CaptureActivity {
    #[default]
    Idle,
    PhotoCapture {
        will_capture: bool,
        is_live_photo: bool,
    },
    MovieCapture {
        duration: Duration,
    },
}

impl CaptureActivity {
    pub fn is_recording(&self) -> bool {
        matches!(self, CaptureActivity::MovieCapture { .. })
    }

    pub fn will_capture(&self) -> bool {
        matches!(
            self,
            CaptureActivity::PhotoCapture {
                will_capture: true,
                ..
            }
        )
    }
}

/// Features the active output advertises to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureCapabilities {
    pub is_live_photo_capture_supported: bool,
    pub is_hdr_supported: bool,
    pub is_pro_raw_supported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DevicePosition {
    Back,
    Front,
    External,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    WideAngle,
    UltraWide,
    Telephoto,
    DualCamera,
    TripleCamera,
    TrueDepth,
    External,
    Microphone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocusMode {
    Locked,
    AutoFocus,
    ContinuousAutoFocus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExposureMode {
    Locked,
    AutoExpose,
    ContinuousAutoExposure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A physical camera or microphone as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureDevice {
    pub id: String,
    pub name: String,
    pub media_type: MediaType,
    pub position: DevicePosition,
    pub device_type: DeviceType,
    pub focus_point_of_interest_supported: bool,
    pub exposure_point_of_interest_supported: bool,
    pub focus_modes: Vec<FocusMode>,
    pub exposure_modes: Vec<ExposureMode>,
    /// True when the device offers a 10-bit HDR variant of its active format.
    pub supports_hdr_video: bool,
    pub max_photo_dimensions: Option<Dimensions>,
}

impl CaptureDevice {
    /// A fully featured camera at the given position.
    pub fn camera(
        id: impl Into<String>,
        name: impl Into<String>,
        position: DevicePosition,
        device_type: DeviceType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            media_type: MediaType::Video,
            position,
            device_type,
            focus_point_of_interest_supported: true,
            exposure_point_of_interest_supported: true,
            focus_modes: vec![
                FocusMode::Locked,
                FocusMode::AutoFocus,
                FocusMode::ContinuousAutoFocus,
            ],
            exposure_modes: vec![
                ExposureMode::Locked,
                ExposureMode::AutoExpose,
                ExposureMode::ContinuousAutoExposure,
            ],
            supports_hdr_video: true,
            max_photo_dimensions: Some(Dimensions::new(4032, 3024)),
        }
    }

    /// A camera without point-of-interest or mode control (typical webcam).
    pub fn external(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            focus_point_of_interest_supported: false,
            exposure_point_of_interest_supported: false,
            focus_modes: vec![FocusMode::ContinuousAutoFocus],
            exposure_modes: vec![ExposureMode::ContinuousAutoExposure],
            supports_hdr_video: false,
            max_photo_dimensions: Some(Dimensions::new(1920, 1080)),
            ..Self::camera(id, name, DevicePosition::External, DeviceType::External)
        }
    }

    pub fn microphone(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            media_type: MediaType::Audio,
            position: DevicePosition::Unspecified,
            device_type: DeviceType::Microphone,
            focus_point_of_interest_supported: false,
            exposure_point_of_interest_supported: false,
            focus_modes: Vec::new(),
            exposure_modes: Vec::new(),
            supports_hdr_video: false,
            max_photo_dimensions: None,
        }
    }

    pub fn is_focus_mode_supported(&self, mode: FocusMode) -> bool {
        self.focus_modes.contains(&mode)
    }

    pub fn is_exposure_mode_supported(&self, mode: ExposureMode) -> bool {
        self.exposure_modes.contains(&mode)
    }
}

/// Handle to a device attached (or attachable) to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInput {
    pub device: CaptureDevice,
}

impl DeviceInput {
    pub fn new(device: CaptureDevice) -> Self {
        Self { device }
    }

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn is_video(&self) -> bool {
        self.device.media_type == MediaType::Video
    }
}

/// Preview-level and capture-level rotation angles, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RotationAngles {
    pub preview: f64,
    pub capture: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptionReason {
    VideoDeviceNotAvailableInBackground,
    AudioDeviceInUseByAnotherClient,
    VideoDeviceInUseByAnotherClient,
    VideoDeviceNotAvailableWithMultipleForegroundApps,
    VideoDeviceNotAvailableDueToSystemPressure,
}

impl InterruptionReason {
    /// Whether another client has taken the camera or microphone.
    pub fn is_device_in_use(&self) -> bool {
        matches!(
            self,
            InterruptionReason::AudioDeviceInUseByAnotherClient
                | InterruptionReason::VideoDeviceInUseByAnotherClient
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeErrorKind {
    MediaServicesWereReset,
    DeviceWasDisconnected,
    SessionConfigurationChanged,
    Other(String),
}

/// Notifications the platform posts about the running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotification {
    WasInterrupted(InterruptionReason),
    InterruptionEnded,
    RuntimeError(RuntimeErrorKind),
    SubjectAreaDidChange { device_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPreset {
    Photo,
    High,
}

impl SessionPreset {
    pub fn for_mode(mode: CaptureMode) -> Self {
        match mode {
            CaptureMode::Photo => SessionPreset::Photo,
            CaptureMode::Video => SessionPreset::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    Photo,
    Movie,
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputKind::Photo => write!(f, "photo"),
            OutputKind::Movie => write!(f, "movie"),
        }
    }
}

/// Normalised point; preview coordinates before conversion, device point of
/// interest (`0..=1`) after.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const CENTER: Point = Point { x: 0.5, y: 0.5 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Focus/exposure change; `None` leaves the device's current value alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusExposureSettings {
    pub focus_mode: Option<FocusMode>,
    pub focus_point: Option<Point>,
    pub exposure_mode: Option<ExposureMode>,
    pub exposure_point: Option<Point>,
    pub subject_area_change_monitoring: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoFormat {
    Standard,
    Hdr10Bit,
}

/// A change applied to a device while it is locked for configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeviceUpdate {
    FocusExposure(FocusExposureSettings),
    ActiveFormat(VideoFormat),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPrioritization {
    Speed,
    #[default]
    Balanced,
    Quality,
}

/// Feature flags for one photo capture, normally supplied by the settings model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhotoFeatures {
    pub is_live_photo_enabled: bool,
    pub is_pro_raw_enabled: bool,
    pub quality_prioritization: QualityPrioritization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhotoCodec {
    ProRaw,
    Hevc,
    Jpeg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoSettings {
    pub id: Uuid,
    pub codec: PhotoCodec,
    pub live_photo_movie_path: Option<PathBuf>,
    pub quality_prioritization: QualityPrioritization,
    pub max_photo_dimensions: Option<Dimensions>,
}

/// A finished still capture.
#[derive(Debug, Clone)]
pub struct Photo {
    pub id: Uuid,
    pub data: Bytes,
    pub codec: PhotoCodec,
    pub live_photo_movie: Option<PathBuf>,
    pub captured_at: DateTime<Utc>,
}

/// Best-effort progress of an individual photo capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhotoCaptureEvent {
    WillBegin { id: Uuid, is_live_photo: bool },
    WillCapture { id: Uuid },
    DidCapture { id: Uuid },
    DidFinishProcessing { id: Uuid },
    DidFinishLivePhotoMovie { id: Uuid },
    DidFinish { id: Uuid, success: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MovieFeatures {
    pub is_hdr_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovieCodec {
    Hevc,
    H264,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSettings {
    pub id: Uuid,
    pub codec: MovieCodec,
    pub output_path: PathBuf,
    pub is_hdr: bool,
}

/// A finished movie recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: Uuid,
    pub path: PathBuf,
    pub codec: MovieCodec,
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Feature bundle the capture service starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CameraState {
    pub capture_mode: CaptureMode,
    pub is_video_hdr_enabled: bool,
    pub is_live_photo_enabled: bool,
    pub is_pro_raw_enabled: bool,
    pub quality_prioritization: QualityPrioritization,
}

impl CameraState {
    pub fn photo_features(&self) -> PhotoFeatures {
        PhotoFeatures {
            is_live_photo_enabled: self.is_live_photo_enabled,
            is_pro_raw_enabled: self.is_pro_raw_enabled,
            quality_prioritization: self.quality_prioritization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_in_use_reasons() {
        assert!(InterruptionReason::VideoDeviceInUseByAnotherClient.is_device_in_use());
        assert!(InterruptionReason::AudioDeviceInUseByAnotherClient.is_device_in_use());
        assert!(!InterruptionReason::VideoDeviceNotAvailableInBackground.is_device_in_use());
        assert!(!InterruptionReason::VideoDeviceNotAvailableDueToSystemPressure.is_device_in_use());
    }

    #[test]
    fn test_preset_for_mode() {
        assert_eq!(SessionPreset::for_mode(CaptureMode::Photo), SessionPreset::Photo);
        assert_eq!(SessionPreset::for_mode(CaptureMode::Video), SessionPreset::High);
    }

    #[test]
    fn test_external_camera_has_no_point_of_interest() {
        let webcam = CaptureDevice::external("ext", "USB Camera");
        assert_eq!(webcam.position, DevicePosition::External);
        assert!(!webcam.focus_point_of_interest_supported);
        assert!(!webcam.is_focus_mode_supported(FocusMode::AutoFocus));
        assert!(webcam.is_focus_mode_supported(FocusMode::ContinuousAutoFocus));
    }

    #[test]
    fn test_activity_helpers() {
        assert!(!CaptureActivity::Idle.is_recording());
        assert!(CaptureActivity::MovieCapture {
            duration: Duration::from_secs(1)
        }
        .is_recording());
        assert!(CaptureActivity::PhotoCapture {
            will_capture: true,
            is_live_photo: false
        }
        .will_capture());
    }

    #[test]
    fn test_capture_mode_serde() {
        let json = serde_json::to_string(&CaptureMode::Video).unwrap();
        assert_eq!(json, "\"video\"");
    }
}
