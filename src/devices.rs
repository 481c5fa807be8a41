//! Device lookup over a [`DeviceProvider`].

use crate::errors::CaptureError;
use crate::platform::DeviceProvider;
use crate::types::{CaptureDevice, DevicePosition};
use std::collections::HashSet;
use std::sync::Arc;

/// Orders and selects cameras and microphones.
#[derive(Clone)]
pub struct DeviceLookup {
    provider: Arc<dyn DeviceProvider>,
}

impl DeviceLookup {
    pub fn new(provider: Arc<dyn DeviceProvider>) -> Self {
        Self { provider }
    }

    /// Cameras in switching order: back, then front, then external.
    pub fn cameras(&self) -> Vec<CaptureDevice> {
        order_cameras(self.provider.video_devices())
    }

    /// System-preferred camera, else the first back, front or external one.
    pub fn default_camera(&self) -> Result<CaptureDevice, CaptureError> {
        if let Some(preferred) = self.provider.system_preferred_camera() {
            return Ok(preferred);
        }
        self.cameras()
            .into_iter()
            .next()
            .ok_or(CaptureError::VideoDeviceUnavailable)
    }

    pub fn default_microphone(&self) -> Result<CaptureDevice, CaptureError> {
        self.provider
            .audio_devices()
            .into_iter()
            .next()
            .ok_or(CaptureError::AudioDeviceUnavailable)
    }

    /// The camera after `current`, wrapping around to the first.
    pub fn next_camera(&self, current: &CaptureDevice) -> Option<CaptureDevice> {
        next_in_cycle(&self.cameras(), current)
    }
}

/// Groups cameras by position, keeping discovery order within each group
/// and dropping repeated ids.
pub fn order_cameras(devices: Vec<CaptureDevice>) -> Vec<CaptureDevice> {
    let mut seen = HashSet::new();
    let unique: Vec<CaptureDevice> = devices
        .into_iter()
        .filter(|device| seen.insert(device.id.clone()))
        .collect();

    let mut ordered = Vec::with_capacity(unique.len());
    for group in [
        DevicePosition::Back,
        DevicePosition::Front,
        DevicePosition::External,
    ] {
        ordered.extend(unique.iter().filter(|d| d.position == group).cloned());
    }
    // Cameras that report no position are reachable too, after externals.
    ordered.extend(
        unique
            .into_iter()
            .filter(|d| d.position == DevicePosition::Unspecified),
    );
    ordered
}

/// Next element after `current` with wraparound. An unknown `current` counts
/// as index 0.
pub fn next_in_cycle(devices: &[CaptureDevice], current: &CaptureDevice) -> Option<CaptureDevice> {
    if devices.is_empty() {
        return None;
    }
    let index = devices
        .iter()
        .position(|device| device.id == current.id)
        .unwrap_or(0);
    devices.get((index + 1) % devices.len()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;
    use crate::testing::fixture_devices;
    use crate::types::DeviceType;

    fn ids(devices: &[CaptureDevice]) -> Vec<&str> {
        devices.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_order_groups_by_position() {
        let devices = vec![
            CaptureDevice::external("usb", "USB"),
            CaptureDevice::camera("front", "Front", DevicePosition::Front, DeviceType::TrueDepth),
            CaptureDevice::camera("wide", "Wide", DevicePosition::Back, DeviceType::WideAngle),
            CaptureDevice::camera("ultra", "Ultra", DevicePosition::Back, DeviceType::UltraWide),
        ];
        let ordered = order_cameras(devices);
        assert_eq!(ids(&ordered), vec!["wide", "ultra", "front", "usb"]);
    }

    #[test]
    fn test_order_removes_duplicates() {
        let wide = CaptureDevice::camera("wide", "Wide", DevicePosition::Back, DeviceType::WideAngle);
        let ordered = order_cameras(vec![wide.clone(), wide]);
        assert_eq!(ordered.len(), 1);
    }

    #[test]
    fn test_next_wraps_from_external_to_back() {
        let ordered = order_cameras(fixture_devices().cameras);
        let last = ordered.last().unwrap().clone();
        let next = next_in_cycle(&ordered, &last).unwrap();
        assert_eq!(next.position, DevicePosition::Back);
        assert_eq!(next.id, ordered[0].id);
    }

    #[test]
    fn test_unknown_current_starts_at_second() {
        let ordered = order_cameras(fixture_devices().cameras);
        let stranger = CaptureDevice::external("gone", "Unplugged");
        assert_eq!(next_in_cycle(&ordered, &stranger).unwrap().id, ordered[1].id);
    }

    #[test]
    fn test_default_camera_prefers_system_choice() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
        let lookup = DeviceLookup::new(platform.clone());
        assert_eq!(lookup.default_camera().unwrap().position, DevicePosition::Back);

        let front = lookup
            .cameras()
            .into_iter()
            .find(|d| d.position == DevicePosition::Front)
            .unwrap();
        platform.set_system_preferred_camera(Some(front.clone()));
        assert_eq!(lookup.default_camera().unwrap().id, front.id);
    }

    #[test]
    fn test_missing_devices_are_typed_errors() {
        let platform = Arc::new(SimulatedPlatform::new(Vec::new(), Vec::new()));
        let lookup = DeviceLookup::new(platform);
        assert!(matches!(
            lookup.default_camera(),
            Err(CaptureError::VideoDeviceUnavailable)
        ));
        assert!(matches!(
            lookup.default_microphone(),
            Err(CaptureError::AudioDeviceUnavailable)
        ));
    }
}
