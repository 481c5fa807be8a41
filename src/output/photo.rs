//! Still capture through the platform photo output.

use super::OutputService;
use crate::errors::{CaptureError, PlatformError};
use crate::platform::PhotoOutput;
use crate::types::{
    CaptureActivity, CaptureCapabilities, CaptureDevice, Dimensions, OutputKind, Photo,
    PhotoCaptureEvent, PhotoCodec, PhotoFeatures, PhotoSettings,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, oneshot, watch};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
struct InFlight {
    will_capture: bool,
    is_live_photo: bool,
}

/// Folds every in-flight capture into one published activity value.
struct PhotoActivity {
    sender: watch::Sender<CaptureActivity>,
    in_flight: Mutex<HashMap<Uuid, InFlight>>,
}

impl PhotoActivity {
    fn new() -> Self {
        let (sender, _) = watch::channel(CaptureActivity::Idle);
        Self {
            sender,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn update(&self, id: Uuid, change: impl FnOnce(&mut InFlight)) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        change(in_flight.entry(id).or_default());
        self.publish(&in_flight);
    }

    fn remove(&self, id: Uuid) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.remove(&id).is_some() {
            self.publish(&in_flight);
        }
    }

    fn publish(&self, in_flight: &HashMap<Uuid, InFlight>) {
        let activity = if in_flight.is_empty() {
            CaptureActivity::Idle
        } else {
            CaptureActivity::PhotoCapture {
                will_capture: in_flight.values().any(|c| c.will_capture),
                is_live_photo: in_flight.values().any(|c| c.is_live_photo),
            }
        };
        self.sender.send_replace(activity);
    }
}

/// Receives the platform callbacks for exactly one photo capture.
///
/// `did_finish_capture` consumes the delegate and resolves the caller's
/// pending result. Dropping an unfinished delegate resolves it with
/// [`CaptureError::CaptureFailed`].
pub struct PhotoCaptureDelegate {
    settings: PhotoSettings,
    activity: Arc<PhotoActivity>,
    events: broadcast::Sender<PhotoCaptureEvent>,
    photo_data: Option<Bytes>,
    live_photo_movie: Option<PathBuf>,
    completion: Option<oneshot::Sender<Result<Photo, CaptureError>>>,
}

impl PhotoCaptureDelegate {
    fn new(
        settings: PhotoSettings,
        activity: Arc<PhotoActivity>,
        events: broadcast::Sender<PhotoCaptureEvent>,
    ) -> (Self, oneshot::Receiver<Result<Photo, CaptureError>>) {
        let (tx, rx) = oneshot::channel();
        let delegate = Self {
            settings,
            activity,
            events,
            photo_data: None,
            live_photo_movie: None,
            completion: Some(tx),
        };
        (delegate, rx)
    }

    pub fn id(&self) -> Uuid {
        self.settings.id
    }

    pub fn settings(&self) -> &PhotoSettings {
        &self.settings
    }

    pub fn will_begin_capture(&mut self) {
        let is_live_photo = self.settings.live_photo_movie_path.is_some();
        self.activity.update(self.id(), |c| c.is_live_photo = is_live_photo);
        self.emit(PhotoCaptureEvent::WillBegin {
            id: self.id(),
            is_live_photo,
        });
    }

    /// The shutter is about to fire.
    pub fn will_capture_photo(&mut self) {
        self.activity.update(self.id(), |c| c.will_capture = true);
        self.emit(PhotoCaptureEvent::WillCapture { id: self.id() });
    }

    pub fn did_capture_photo(&mut self) {
        self.activity.update(self.id(), |c| c.will_capture = false);
        self.emit(PhotoCaptureEvent::DidCapture { id: self.id() });
    }

    pub fn did_finish_processing_photo(&mut self, result: Result<Bytes, PlatformError>) {
        match result {
            Ok(data) => self.photo_data = Some(data),
            Err(e) => log::debug!("Photo {} processing error: {}", self.id(), e),
        }
        self.emit(PhotoCaptureEvent::DidFinishProcessing { id: self.id() });
    }

    pub fn did_finish_recording_live_photo_movie(&mut self) {
        self.activity.update(self.id(), |c| c.is_live_photo = false);
    }

    pub fn did_finish_processing_live_photo_movie(&mut self, result: Result<PathBuf, PlatformError>) {
        match result {
            Ok(path) => self.live_photo_movie = Some(path),
            Err(e) => log::debug!("Live photo movie for {} failed: {}", self.id(), e),
        }
        self.emit(PhotoCaptureEvent::DidFinishLivePhotoMovie { id: self.id() });
    }

    /// Final callback; resolves the pending capture.
    pub fn did_finish_capture(mut self, error: Option<PlatformError>) {
        let result = match (error, self.photo_data.take()) {
            (Some(error), _) => Err(CaptureError::CaptureFailed(error.message)),
            (None, None) => Err(CaptureError::NoPhotoData),
            (None, Some(data)) => Ok(Photo {
                id: self.id(),
                data,
                codec: self.settings.codec,
                live_photo_movie: self.live_photo_movie.take(),
                captured_at: chrono::Utc::now(),
            }),
        };
        self.emit(PhotoCaptureEvent::DidFinish {
            id: self.id(),
            success: result.is_ok(),
        });
        self.resolve(result);
    }

    fn resolve(&mut self, result: Result<Photo, CaptureError>) {
        if let Some(completion) = self.completion.take() {
            if completion.send(result).is_err() {
                log::debug!("Photo {} finished after its caller went away", self.id());
            }
        }
    }

    fn emit(&self, event: PhotoCaptureEvent) {
        // Progress is best effort: no subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Drop for PhotoCaptureDelegate {
    fn drop(&mut self) {
        if self.completion.is_some() {
            log::warn!("Photo capture {} abandoned by the platform", self.id());
            self.resolve(Err(CaptureError::CaptureFailed(
                "photo capture abandoned before completion".to_string(),
            )));
        }
        self.activity.remove(self.id());
    }
}

/// Builds photo settings, issues captures and reports photo activity.
pub struct PhotoOutputService {
    output: Arc<dyn PhotoOutput>,
    activity: Arc<PhotoActivity>,
    events: broadcast::Sender<PhotoCaptureEvent>,
    max_photo_dimensions: Mutex<Option<Dimensions>>,
    storage_dir: PathBuf,
}

impl PhotoOutputService {
    pub fn new(output: Arc<dyn PhotoOutput>, storage_dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            output,
            activity: Arc::new(PhotoActivity::new()),
            events,
            max_photo_dimensions: Mutex::new(None),
            storage_dir: storage_dir.into(),
        }
    }

    /// Settings for one capture: pro-RAW > HEVC > JPEG, live photo only when
    /// requested and currently enabled on the output.
    pub fn create_settings(&self, features: &PhotoFeatures) -> PhotoSettings {
        let codecs = self.output.available_photo_codecs();
        let codec = if features.is_pro_raw_enabled && self.output.is_pro_raw_supported() {
            PhotoCodec::ProRaw
        } else if codecs.contains(&PhotoCodec::Hevc) {
            PhotoCodec::Hevc
        } else {
            PhotoCodec::Jpeg
        };

        let id = Uuid::new_v4();
        let live_photo_movie_path = (features.is_live_photo_enabled
            && self.output.is_live_photo_capture_enabled())
        .then(|| self.storage_dir.join(format!("{id}.mov")));

        PhotoSettings {
            id,
            codec,
            live_photo_movie_path,
            quality_prioritization: features.quality_prioritization,
            max_photo_dimensions: *self
                .max_photo_dimensions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Capture one photo. Concurrent calls run as independent captures.
    pub async fn capture_photo(&self, features: PhotoFeatures) -> Result<Photo, CaptureError> {
        let settings = self.create_settings(&features);
        let id = settings.id;
        log::info!("Capturing photo {} as {:?}", id, settings.codec);

        let (delegate, completion) =
            PhotoCaptureDelegate::new(settings.clone(), self.activity.clone(), self.events.clone());
        self.output.capture_photo(settings, delegate);

        let result = completion.await.unwrap_or_else(|_| {
            Err(CaptureError::CaptureFailed(
                "photo output dropped the capture".to_string(),
            ))
        });
        match &result {
            Ok(photo) => log::info!("Photo {} captured ({} bytes)", id, photo.data.len()),
            Err(e) => log::error!("Photo {} failed: {}", id, e),
        }
        result
    }

    pub fn set_live_photo_capture_enabled(&self, enabled: bool) -> Result<(), CaptureError> {
        if enabled && !self.output.is_live_photo_capture_supported() {
            return Err(CaptureError::NoLivePhotoSupport);
        }
        self.output.set_live_photo_capture_enabled(enabled);
        Ok(())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PhotoCaptureEvent> {
        self.events.subscribe()
    }
}

impl OutputService for PhotoOutputService {
    fn kind(&self) -> OutputKind {
        OutputKind::Photo
    }

    fn activity(&self) -> watch::Receiver<CaptureActivity> {
        self.activity.sender.subscribe()
    }

    fn capabilities(&self) -> CaptureCapabilities {
        CaptureCapabilities {
            is_live_photo_capture_supported: self.output.is_live_photo_capture_supported(),
            is_hdr_supported: false,
            is_pro_raw_supported: self.output.is_pro_raw_supported(),
        }
    }

    fn set_video_rotation_angle(&self, angle: f64) {
        self.output.set_rotation_angle(angle);
    }

    fn update_configuration(&self, device: &CaptureDevice) {
        *self
            .max_photo_dimensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = device.max_photo_dimensions;
        self.output.set_max_photo_dimensions(device.max_photo_dimensions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;
    use crate::types::QualityPrioritization;

    fn service(platform: &Arc<SimulatedPlatform>) -> PhotoOutputService {
        PhotoOutputService::new(platform.clone(), std::env::temp_dir())
    }

    #[test]
    fn test_codec_preference_order() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
        let photos = service(&platform);

        let raw = PhotoFeatures {
            is_pro_raw_enabled: true,
            ..PhotoFeatures::default()
        };
        assert_eq!(photos.create_settings(&raw).codec, PhotoCodec::ProRaw);

        platform.set_pro_raw_supported(false);
        assert_eq!(photos.create_settings(&raw).codec, PhotoCodec::Hevc);

        platform.set_photo_codecs(vec![PhotoCodec::Jpeg]);
        assert_eq!(photos.create_settings(&raw).codec, PhotoCodec::Jpeg);
    }

    #[test]
    fn test_live_photo_path_requires_request_and_support() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
        let photos = service(&platform);
        photos.set_live_photo_capture_enabled(true).unwrap();

        let live = PhotoFeatures {
            is_live_photo_enabled: true,
            ..PhotoFeatures::default()
        };
        let settings = photos.create_settings(&live);
        let path = settings.live_photo_movie_path.unwrap();
        assert!(path.to_string_lossy().contains(&settings.id.to_string()));

        assert!(photos
            .create_settings(&PhotoFeatures::default())
            .live_photo_movie_path
            .is_none());

        photos.set_live_photo_capture_enabled(false).unwrap();
        assert!(photos.create_settings(&live).live_photo_movie_path.is_none());
    }

    #[test]
    fn test_quality_prioritization_passthrough() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
        let photos = service(&platform);
        let features = PhotoFeatures {
            quality_prioritization: QualityPrioritization::Speed,
            ..PhotoFeatures::default()
        };
        assert_eq!(
            photos.create_settings(&features).quality_prioritization,
            QualityPrioritization::Speed
        );
    }

    #[test]
    fn test_enabling_unsupported_live_photo_fails() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
        platform.set_live_photo_supported(false);
        let photos = service(&platform);
        assert!(matches!(
            photos.set_live_photo_capture_enabled(true),
            Err(CaptureError::NoLivePhotoSupport)
        ));
        assert!(photos.set_live_photo_capture_enabled(false).is_ok());
    }

    #[tokio::test]
    async fn test_dropped_delegate_resolves_with_failure() {
        let activity = Arc::new(PhotoActivity::new());
        let (events, _) = broadcast::channel(4);
        let settings = PhotoSettings {
            id: Uuid::new_v4(),
            codec: PhotoCodec::Jpeg,
            live_photo_movie_path: None,
            quality_prioritization: QualityPrioritization::Balanced,
            max_photo_dimensions: None,
        };
        let mut watcher = activity.sender.subscribe();
        let (mut delegate, completion) = PhotoCaptureDelegate::new(settings, activity, events);

        delegate.will_capture_photo();
        assert!(watcher.borrow_and_update().will_capture());
        drop(delegate);

        assert!(matches!(
            completion.await.unwrap(),
            Err(CaptureError::CaptureFailed(_))
        ));
        assert_eq!(*watcher.borrow(), CaptureActivity::Idle);
    }

    #[tokio::test]
    async fn test_finish_without_data_is_no_photo_data() {
        let activity = Arc::new(PhotoActivity::new());
        let (events, _) = broadcast::channel(4);
        let settings = PhotoSettings {
            id: Uuid::new_v4(),
            codec: PhotoCodec::Hevc,
            live_photo_movie_path: None,
            quality_prioritization: QualityPrioritization::Quality,
            max_photo_dimensions: None,
        };
        let (mut delegate, completion) = PhotoCaptureDelegate::new(settings, activity, events);
        delegate.did_finish_processing_photo(Err(PlatformError::new("sensor glitch")));
        delegate.did_finish_capture(None);

        assert!(matches!(
            completion.await.unwrap(),
            Err(CaptureError::NoPhotoData)
        ));
    }
}
