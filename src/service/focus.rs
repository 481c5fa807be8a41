use crate::types::{CaptureDevice, ExposureMode, FocusExposureSettings, FocusMode, Point};

/// Why focus/exposure is being changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusIntent {
    /// A tap: lock onto the point once and watch for subject-area changes.
    UserInitiated,
    /// The scene changed: fall back to continuous adjustment.
    Ambient,
}

/// Settings for `device`, keeping only what the device supports.
pub fn focus_exposure_settings(
    device: &CaptureDevice,
    point: Point,
    intent: FocusIntent,
) -> FocusExposureSettings {
    let (focus_mode, exposure_mode, monitor) = match intent {
        FocusIntent::UserInitiated => (FocusMode::AutoFocus, ExposureMode::AutoExpose, true),
        FocusIntent::Ambient => (
            FocusMode::ContinuousAutoFocus,
            ExposureMode::ContinuousAutoExposure,
            false,
        ),
    };

    let focus_ok =
        device.focus_point_of_interest_supported && device.is_focus_mode_supported(focus_mode);
    let exposure_ok = device.exposure_point_of_interest_supported
        && device.is_exposure_mode_supported(exposure_mode);

    FocusExposureSettings {
        focus_mode: focus_ok.then_some(focus_mode),
        focus_point: focus_ok.then_some(point),
        exposure_mode: exposure_ok.then_some(exposure_mode),
        exposure_point: exposure_ok.then_some(point),
        subject_area_change_monitoring: monitor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DevicePosition, DeviceType};

    #[test]
    fn test_user_initiated_locks_point_and_monitors() {
        let camera = CaptureDevice::camera("wide", "Wide", DevicePosition::Back, DeviceType::WideAngle);
        let point = Point::new(0.2, 0.7);
        let settings = focus_exposure_settings(&camera, point, FocusIntent::UserInitiated);
        assert_eq!(settings.focus_mode, Some(FocusMode::AutoFocus));
        assert_eq!(settings.focus_point, Some(point));
        assert_eq!(settings.exposure_mode, Some(ExposureMode::AutoExpose));
        assert!(settings.subject_area_change_monitoring);
    }

    #[test]
    fn test_ambient_is_continuous_without_monitoring() {
        let camera = CaptureDevice::camera("wide", "Wide", DevicePosition::Back, DeviceType::WideAngle);
        let settings = focus_exposure_settings(&camera, Point::CENTER, FocusIntent::Ambient);
        assert_eq!(settings.focus_mode, Some(FocusMode::ContinuousAutoFocus));
        assert_eq!(settings.exposure_mode, Some(ExposureMode::ContinuousAutoExposure));
        assert!(!settings.subject_area_change_monitoring);
    }

    #[test]
    fn test_unsupported_device_is_gated() {
        let webcam = CaptureDevice::external("usb", "USB");
        let settings = focus_exposure_settings(&webcam, Point::new(0.1, 0.1), FocusIntent::UserInitiated);
        assert_eq!(settings.focus_mode, None);
        assert_eq!(settings.focus_point, None);
        assert_eq!(settings.exposure_point, None);
        // Monitoring is still toggled.
        assert!(settings.subject_area_change_monitoring);
    }

    #[test]
    fn test_partial_support() {
        let mut camera = CaptureDevice::camera("front", "Front", DevicePosition::Front, DeviceType::TrueDepth);
        camera.focus_point_of_interest_supported = false;
        let settings = focus_exposure_settings(&camera, Point::CENTER, FocusIntent::Ambient);
        assert_eq!(settings.focus_mode, None);
        assert_eq!(settings.exposure_mode, Some(ExposureMode::ContinuousAutoExposure));
    }
}
