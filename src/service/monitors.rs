//! Long-lived listener tasks spawned by the capture service.
//!
//! Listeners hold a `Weak` reference to the service so that dropping the last
//! `CaptureService` handle ends them; the owning state also aborts them.

use super::{CaptureService, FocusIntent, Inner, Published};
use crate::types::{
    CaptureActivity, CaptureDevice, OutputKind, Point, RotationAngles, RuntimeErrorKind,
    SessionNotification,
};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

fn upgrade(service: &Weak<Inner>) -> Option<CaptureService> {
    service.upgrade().map(CaptureService::from_inner)
}

/// Interruption and runtime-error handling for the whole session.
pub(super) async fn observe_session(
    service: Weak<Inner>,
    mut notifications: broadcast::Receiver<SessionNotification>,
) {
    loop {
        let notification = match notifications.recv().await {
            Ok(notification) => notification,
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Missed {} session notifications", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(service) = upgrade(&service) else {
            break;
        };
        let published = &service.inner.published;

        match notification {
            SessionNotification::WasInterrupted(reason) => {
                log::info!("Capture session interrupted: {:?}", reason);
                published.interrupted.send_replace(reason.is_device_in_use());
            }
            SessionNotification::InterruptionEnded => {
                log::info!("Capture session interruption ended");
                published.interrupted.send_replace(false);
            }
            SessionNotification::RuntimeError(RuntimeErrorKind::MediaServicesWereReset) => {
                service.resume_after_media_reset().await;
            }
            SessionNotification::RuntimeError(other) => {
                log::error!("Capture session runtime error: {:?}", other);
            }
            SessionNotification::SubjectAreaDidChange { .. } => {}
        }
    }
}

/// Re-centres continuous focus when the active device's scene changes.
pub(super) async fn observe_subject_area(
    service: Weak<Inner>,
    device: CaptureDevice,
    mut notifications: broadcast::Receiver<SessionNotification>,
) {
    loop {
        match notifications.recv().await {
            Ok(SessionNotification::SubjectAreaDidChange { device_id }) if device_id == device.id => {
                let Some(service) = upgrade(&service) else {
                    break;
                };
                if let Err(e) =
                    service.apply_focus_exposure(&device, Point::CENTER, FocusIntent::Ambient)
                {
                    log::warn!("Unable to reset focus on {}: {}", device.name, e);
                }
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

/// Publishes the preview angle and pushes the capture angle into both outputs.
pub(super) async fn observe_rotation(
    service: Weak<Inner>,
    mut angles: watch::Receiver<RotationAngles>,
) {
    loop {
        let current = *angles.borrow_and_update();
        match upgrade(&service) {
            Some(service) => service.apply_rotation(current),
            None => break,
        }
        if angles.changed().await.is_err() {
            break;
        }
    }
}

/// Forwards whichever output changed last to the published activity.
pub(super) async fn merge_output_activity(
    published: Arc<Published>,
    mut photo: watch::Receiver<CaptureActivity>,
    mut movie: watch::Receiver<CaptureActivity>,
) {
    loop {
        let source = tokio::select! {
            Ok(()) = photo.changed() => OutputKind::Photo,
            Ok(()) = movie.changed() => OutputKind::Movie,
            else => break,
        };
        let activity = match source {
            OutputKind::Photo => *photo.borrow_and_update(),
            OutputKind::Movie => *movie.borrow_and_update(),
        };
        published.activity.send_replace(activity);
    }
}

/// Follows the system-preferred camera.
pub(super) async fn observe_preferred_camera(
    service: Weak<Inner>,
    mut preferred: watch::Receiver<Option<CaptureDevice>>,
) {
    while preferred.changed().await.is_ok() {
        let device = preferred.borrow_and_update().clone();
        let Some(device) = device else {
            continue;
        };
        let Some(service) = upgrade(&service) else {
            break;
        };

        let mut state = service.inner.state.lock().await;
        if state.active_device().map(|d| d.id.as_str()) == Some(device.id.as_str()) {
            continue;
        }
        log::info!("System-preferred camera changed to {}", device.name);
        if let Err(e) = service.change_device_locked(&mut state, device) {
            log::warn!("{}", e);
        }
    }
}
