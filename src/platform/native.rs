//! Camera discovery backed by `nokhwa`.
//!
//! Only discovery is native: every camera is reported as an external device
//! with no point-of-interest control, the first one is treated as the
//! system-preferred camera and rotation stays at zero. There is no hotplug
//! callback, so the preferred-camera stream only moves when the owner polls
//! [`NativeDeviceProvider::refresh`].

use super::DeviceProvider;
use crate::errors::PlatformError;
use crate::permissions::PermissionStatus;
use crate::types::{CaptureDevice, DeviceUpdate, MediaType, RotationAngles};
use nokhwa::query;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

pub struct NativeDeviceProvider {
    preferred: watch::Sender<Option<CaptureDevice>>,
    user_preferred: Mutex<Option<CaptureDevice>>,
}

impl NativeDeviceProvider {
    pub fn new() -> Self {
        let (preferred, _) = watch::channel(None);
        let provider = Self {
            preferred,
            user_preferred: Mutex::new(None),
        };
        provider.refresh();
        provider
    }

    /// Re-query cameras and publish the preferred one if it changed.
    pub fn refresh(&self) {
        let first = self.video_devices().into_iter().next();
        self.preferred.send_if_modified(|current| {
            if current.as_ref().map(|d| &d.id) == first.as_ref().map(|d| &d.id) {
                return false;
            }
            *current = first;
            true
        });
    }

    fn scan() -> Result<Vec<CaptureDevice>, PlatformError> {
        let cameras = query(nokhwa::utils::ApiBackend::Auto)
            .map_err(|e| PlatformError::new(format!("Failed to query cameras: {}", e)))?;

        Ok(cameras
            .into_iter()
            .map(|info| CaptureDevice::external(info.index().to_string(), info.human_name()))
            .collect())
    }
}

impl Default for NativeDeviceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for NativeDeviceProvider {
    fn video_devices(&self) -> Vec<CaptureDevice> {
        Self::scan().unwrap_or_else(|e| {
            log::warn!("Camera discovery failed: {}", e);
            Vec::new()
        })
    }

    fn audio_devices(&self) -> Vec<CaptureDevice> {
        Vec::new()
    }

    fn system_preferred_camera(&self) -> Option<CaptureDevice> {
        let user = self
            .user_preferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        user.or_else(|| self.preferred.borrow().clone())
    }

    fn watch_system_preferred_camera(&self) -> watch::Receiver<Option<CaptureDevice>> {
        self.preferred.subscribe()
    }

    fn set_user_preferred_camera(&self, device: &CaptureDevice) {
        *self
            .user_preferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(device.clone());
    }

    fn authorization_status(&self, media: MediaType) -> PermissionStatus {
        match media {
            // Enumeration succeeding is the only access signal available here.
            MediaType::Video => match Self::scan() {
                Ok(devices) if !devices.is_empty() => PermissionStatus::Granted,
                Ok(_) => PermissionStatus::NotDetermined,
                Err(_) => PermissionStatus::Denied,
            },
            MediaType::Audio => PermissionStatus::Granted,
        }
    }

    fn request_access(&self, media: MediaType) -> PermissionStatus {
        self.authorization_status(media)
    }

    fn configure_device(&self, device_id: &str, update: DeviceUpdate) -> Result<(), PlatformError> {
        Err(PlatformError::new(format!(
            "device {device_id} does not accept {update:?}"
        )))
    }

    fn rotation_coordinator(&self, _device: &CaptureDevice) -> watch::Receiver<RotationAngles> {
        watch::channel(RotationAngles::default()).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_tracks_first_discovered_camera() {
        let provider = NativeDeviceProvider::new();
        let preferred = provider.watch_system_preferred_camera();

        provider.refresh();
        let first = provider.video_devices().into_iter().next().map(|d| d.id);
        let published = preferred.borrow().as_ref().map(|d| d.id.clone());
        assert_eq!(published, first);
    }
}
