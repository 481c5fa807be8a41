use crate::errors::CaptureError;
use crate::platform::DeviceProvider;
use crate::types::MediaType;

/// Permission status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PermissionStatus {
    /// Permission granted
    Granted,
    /// Permission denied
    Denied,
    /// Permission not determined (user hasn't been asked yet)
    NotDetermined,
    /// Permission restricted (parental controls, etc)
    Restricted,
}

impl PermissionStatus {
    /// Whether prompting the user could still change the outcome
    pub fn can_request(&self) -> bool {
        matches!(self, PermissionStatus::NotDetermined)
    }
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::Granted => write!(f, "granted"),
            PermissionStatus::Denied => write!(f, "denied"),
            PermissionStatus::NotDetermined => write!(f, "not_determined"),
            PermissionStatus::Restricted => write!(f, "restricted"),
        }
    }
}

/// Resolve access to `media`, prompting once when the user hasn't been asked.
pub fn ensure_authorized(
    provider: &dyn DeviceProvider,
    media: MediaType,
) -> Result<(), CaptureError> {
    let mut status = provider.authorization_status(media);
    if status.can_request() {
        log::info!("Requesting {:?} access", media);
        status = provider.request_access(media);
    }

    match status {
        PermissionStatus::Granted => Ok(()),
        other => {
            log::warn!("{:?} access not authorized: {}", media, other);
            Err(CaptureError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;

    #[test]
    fn test_permission_display() {
        assert_eq!(PermissionStatus::Granted.to_string(), "granted");
        assert_eq!(PermissionStatus::NotDetermined.to_string(), "not_determined");
    }

    #[test]
    fn test_granted_is_authorized() {
        let platform = SimulatedPlatform::with_fixture_devices();
        assert!(ensure_authorized(&platform, MediaType::Video).is_ok());
    }

    #[test]
    fn test_not_determined_prompts_once() {
        let platform = SimulatedPlatform::with_fixture_devices();
        platform.set_authorization(MediaType::Video, PermissionStatus::NotDetermined);
        platform.set_access_response(PermissionStatus::Granted);

        assert!(ensure_authorized(&platform, MediaType::Video).is_ok());
        assert_eq!(platform.access_requests(), 1);
    }

    #[test]
    fn test_denied_is_unauthorized() {
        let platform = SimulatedPlatform::with_fixture_devices();
        platform.set_authorization(MediaType::Audio, PermissionStatus::Denied);

        let result = ensure_authorized(&platform, MediaType::Audio);
        assert!(matches!(result, Err(CaptureError::Unauthorized)));
        assert_eq!(platform.access_requests(), 0);
    }
}
