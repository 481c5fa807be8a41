//! The capture service: one coordinator that owns the session graph.
//!
//! Every mutation of the session, the active inputs and the preferences runs
//! while holding [`Inner::state`], an async mutex that plays the role of the
//! service's isolation context. What the UI observes is published through
//! `watch` channels and can be read from any task without the lock.

mod focus;
mod monitors;

pub use focus::{focus_exposure_settings, FocusIntent};

use crate::config::ShutterbugConfig;
use crate::devices::DeviceLookup;
use crate::errors::CaptureError;
use crate::geometry::PreviewGeometry;
use crate::output::{MovieOutputService, OutputService, PhotoOutputService};
use crate::permissions::ensure_authorized;
use crate::platform::{Backend, ConfigurationBracket};
use crate::types::{
    CameraState, CaptureActivity, CaptureCapabilities, CaptureDevice, CaptureMode, DeviceInput,
    DevicePosition, DeviceUpdate, MediaType, Movie, MovieFeatures, OutputKind, Photo,
    PhotoCaptureEvent, PhotoFeatures, Point, RotationAngles, SessionPreset, VideoFormat,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

/// Background task aborted when its owner drops it.
struct Listener(JoinHandle<()>);

impl Drop for Listener {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// State published to observers.
pub(crate) struct Published {
    activity: watch::Sender<CaptureActivity>,
    capabilities: watch::Sender<CaptureCapabilities>,
    interrupted: watch::Sender<bool>,
    hdr_video_enabled: watch::Sender<bool>,
    preview_rotation: watch::Sender<f64>,
    current_device: watch::Sender<Option<CaptureDevice>>,
    capture_mode: watch::Sender<CaptureMode>,
}

impl Published {
    fn new(mode: CaptureMode) -> Self {
        Self {
            activity: watch::channel(CaptureActivity::Idle).0,
            capabilities: watch::channel(CaptureCapabilities::default()).0,
            interrupted: watch::channel(false).0,
            hdr_video_enabled: watch::channel(false).0,
            preview_rotation: watch::channel(0.0).0,
            current_device: watch::channel(None).0,
            capture_mode: watch::channel(mode).0,
        }
    }
}

/// Everything guarded by the service lock.
struct SessionState {
    is_set_up: bool,
    capture_mode: CaptureMode,
    preferences: CameraState,
    video_input: Option<DeviceInput>,
    audio_input: Option<DeviceInput>,
    preview_size: (f64, f64),
    rotation_listener: Option<Listener>,
    subject_area_listener: Option<Listener>,
    service_listeners: Vec<Listener>,
}

impl SessionState {
    fn active_device(&self) -> Option<&CaptureDevice> {
        self.video_input.as_ref().map(|input| &input.device)
    }
}

pub(crate) struct Inner {
    backend: Backend,
    lookup: DeviceLookup,
    photo: Arc<PhotoOutputService>,
    movie: Arc<MovieOutputService>,
    config: ShutterbugConfig,
    published: Arc<Published>,
    state: Mutex<SessionState>,
}

/// Coordinates the capture session, its devices and both outputs.
///
/// Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct CaptureService {
    inner: Arc<Inner>,
}

impl CaptureService {
    /// Creates the service. Nothing touches the platform until [`start`].
    ///
    /// [`start`]: CaptureService::start
    pub fn new(backend: Backend, config: ShutterbugConfig) -> Self {
        let storage = config.storage.output_directory.clone();
        let preferences = config.capture.camera_state();

        let inner = Inner {
            lookup: DeviceLookup::new(backend.devices.clone()),
            photo: Arc::new(PhotoOutputService::new(
                backend.photo_output.clone(),
                storage.clone(),
            )),
            movie: Arc::new(MovieOutputService::new(backend.movie_output.clone(), storage)),
            published: Arc::new(Published::new(preferences.capture_mode)),
            state: Mutex::new(SessionState {
                is_set_up: false,
                capture_mode: preferences.capture_mode,
                preferences,
                video_input: None,
                audio_input: None,
                preview_size: (1.0, 1.0),
                rotation_listener: None,
                subject_area_listener: None,
                service_listeners: Vec::new(),
            }),
            backend,
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> std::sync::Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    // ----- lifecycle -----

    /// Authorizes, sets the session up once and starts it running.
    ///
    /// Calling this while the session is already running does nothing.
    pub async fn start(&self, camera_state: CameraState) -> Result<(), CaptureError> {
        let devices = self.inner.backend.devices.as_ref();
        ensure_authorized(devices, MediaType::Video)?;
        if self.inner.config.capture.record_audio {
            ensure_authorized(devices, MediaType::Audio)?;
        }

        let mut state = self.inner.state.lock().await;
        let session = &self.inner.backend.session;
        if session.is_running() {
            log::debug!("Capture session already running");
            return Ok(());
        }

        if !state.is_set_up {
            state.capture_mode = camera_state.capture_mode;
            state.preferences = camera_state;
            self.set_up_session(&mut state)?;
        }

        session.start_running();
        log::info!("Capture session running in {} mode", state.capture_mode);
        Ok(())
    }

    /// Restarts a set-up session that stopped when media services reset.
    async fn resume_after_media_reset(&self) {
        let state = self.inner.state.lock().await;
        let session = &self.inner.backend.session;
        if !state.is_set_up || session.is_running() {
            return;
        }
        log::warn!("Media services were reset, restarting capture session");
        session.start_running();
    }

    fn set_up_session(&self, state: &mut SessionState) -> Result<(), CaptureError> {
        let camera = self
            .inner
            .lookup
            .default_camera()
            .map_err(CaptureError::setup)?;
        let microphone = if self.inner.config.capture.record_audio {
            Some(
                self.inner
                    .lookup
                    .default_microphone()
                    .map_err(CaptureError::setup)?,
            )
        } else {
            None
        };

        {
            let _bracket = ConfigurationBracket::begin(self.inner.backend.session.as_ref());
            if let Err(cause) = self.attach_session_graph(state, &camera, microphone.as_ref()) {
                self.detach_partial_graph(state);
                log::error!("Capture session setup failed: {}", cause);
                return Err(CaptureError::setup(cause));
            }
        }

        self.spawn_service_listeners(state);
        self.activate_device(state, &camera);
        state.is_set_up = true;
        self.inner
            .published
            .capture_mode
            .send_replace(state.capture_mode);
        log::info!("Capture session set up with {}", camera.name);
        Ok(())
    }

    fn attach_session_graph(
        &self,
        state: &mut SessionState,
        camera: &CaptureDevice,
        microphone: Option<&CaptureDevice>,
    ) -> Result<(), CaptureError> {
        state.video_input = Some(self.add_input(camera)?);
        if let Some(microphone) = microphone {
            state.audio_input = Some(self.add_input(microphone)?);
        }

        let session = &self.inner.backend.session;
        session.set_preset(SessionPreset::for_mode(state.capture_mode));
        self.add_output(OutputKind::Photo)?;

        match state.capture_mode {
            CaptureMode::Photo => {
                self.apply_live_photo_preference(state);
                self.inner
                    .published
                    .hdr_video_enabled
                    .send_replace(state.preferences.is_video_hdr_enabled);
            }
            CaptureMode::Video => {
                self.add_output(OutputKind::Movie)?;
                self.inner.backend.photo_output.set_live_photo_capture_enabled(false);
                self.apply_hdr_preference(state, camera);
            }
        }
        Ok(())
    }

    fn detach_partial_graph(&self, state: &mut SessionState) {
        let session = &self.inner.backend.session;
        for input in [state.video_input.take(), state.audio_input.take()]
            .into_iter()
            .flatten()
        {
            session.remove_input(&input);
        }
        session.remove_output(OutputKind::Photo);
        session.remove_output(OutputKind::Movie);
    }

    fn add_input(&self, device: &CaptureDevice) -> Result<DeviceInput, CaptureError> {
        let session = &self.inner.backend.session;
        let input = DeviceInput::new(device.clone());
        if !session.can_add_input(&input) {
            return Err(CaptureError::AddInputFailed(device.name.clone()));
        }
        session.add_input(&input);
        Ok(input)
    }

    fn add_output(&self, kind: OutputKind) -> Result<(), CaptureError> {
        let session = &self.inner.backend.session;
        if session.has_output(kind) {
            return Ok(());
        }
        if !session.can_add_output(kind) {
            return Err(CaptureError::AddOutputFailed(kind.to_string()));
        }
        session.add_output(kind);
        Ok(())
    }

    /// Rewires everything that follows the active camera.
    fn activate_device(&self, state: &mut SessionState, device: &CaptureDevice) {
        let outputs: [&dyn OutputService; 2] =
            [self.inner.photo.as_ref(), self.inner.movie.as_ref()];
        for output in outputs {
            log::debug!("Configuring {} output for {}", output.kind(), device.name);
            output.update_configuration(device);
        }

        // Cancel the old device's listeners before subscribing for the new one.
        state.rotation_listener = None;
        state.subject_area_listener = None;

        let angles = self.inner.backend.devices.rotation_coordinator(device);
        state.rotation_listener = Some(Listener(tokio::spawn(monitors::observe_rotation(
            self.downgrade(),
            angles,
        ))));

        let notifications = self.inner.backend.session.notifications();
        state.subject_area_listener = Some(Listener(tokio::spawn(
            monitors::observe_subject_area(self.downgrade(), device.clone(), notifications),
        )));

        self.inner
            .published
            .current_device
            .send_replace(Some(device.clone()));
        self.refresh_capabilities(state);
    }

    fn spawn_service_listeners(&self, state: &mut SessionState) {
        let notifications = self.inner.backend.session.notifications();
        let preferred = self.inner.backend.devices.watch_system_preferred_camera();

        state.service_listeners = vec![
            Listener(tokio::spawn(monitors::observe_session(
                self.downgrade(),
                notifications,
            ))),
            Listener(tokio::spawn(monitors::merge_output_activity(
                self.inner.published.clone(),
                self.inner.photo.activity(),
                self.inner.movie.activity(),
            ))),
            Listener(tokio::spawn(monitors::observe_preferred_camera(
                self.downgrade(),
                preferred,
            ))),
        ];
    }

    // ----- capture mode -----

    /// Reconfigures the session for photo or video capture.
    pub async fn set_capture_mode(&self, mode: CaptureMode) -> Result<(), CaptureError> {
        let mut state = self.inner.state.lock().await;
        if !state.is_set_up {
            state.capture_mode = mode;
            state.preferences.capture_mode = mode;
            self.inner.published.capture_mode.send_replace(mode);
            return Ok(());
        }
        if state.capture_mode == mode {
            return Ok(());
        }
        if mode == CaptureMode::Photo && self.inner.movie.is_recording() {
            return Err(CaptureError::ConfigurationFailed(
                "cannot leave video mode while recording".to_string(),
            ));
        }

        let previous = state.capture_mode;
        let session = &self.inner.backend.session;
        {
            let _bracket = ConfigurationBracket::begin(session.as_ref());
            session.set_preset(SessionPreset::for_mode(mode));

            match mode {
                CaptureMode::Video => {
                    if let Err(e) = self.add_output(OutputKind::Movie) {
                        session.set_preset(SessionPreset::for_mode(previous));
                        log::error!("Unable to enter video mode: {}", e);
                        return Err(e);
                    }
                    self.inner.backend.photo_output.set_live_photo_capture_enabled(false);
                    state.capture_mode = mode;
                    if let Some(device) = state.active_device().cloned() {
                        self.apply_hdr_preference(&state, &device);
                    }
                }
                CaptureMode::Photo => {
                    session.remove_output(OutputKind::Movie);
                    state.capture_mode = mode;
                    self.apply_live_photo_preference(&state);
                }
            }
        }

        state.preferences.capture_mode = mode;
        self.inner.published.capture_mode.send_replace(mode);
        self.refresh_capabilities(&state);
        log::info!("Capture mode changed to {}", mode);
        Ok(())
    }

    // ----- devices -----

    /// Switches to the next camera in the cycle.
    ///
    /// Returns the camera that is active once the attempt is over, which is
    /// the previous one if the switch failed. `None` before setup.
    pub async fn select_next_video_device(&self) -> Option<CaptureDevice> {
        let mut state = self.inner.state.lock().await;
        let current = state.active_device()?.clone();

        match self.inner.lookup.next_camera(&current) {
            Some(next) if next.id != current.id => {
                if let Err(e) = self.change_device_locked(&mut state, next) {
                    log::warn!("{}", e);
                }
            }
            _ => log::debug!("No other camera to switch to"),
        }
        state.active_device().cloned()
    }

    /// Switches to `device` unless it is already active.
    pub async fn select_video_device(&self, device: CaptureDevice) -> Result<(), CaptureError> {
        let mut state = self.inner.state.lock().await;
        self.change_device_locked(&mut state, device)
    }

    fn change_device_locked(
        &self,
        state: &mut SessionState,
        device: CaptureDevice,
    ) -> Result<(), CaptureError> {
        let current = state.video_input.clone().ok_or_else(|| {
            CaptureError::DeviceChangeFailed("no active video input".to_string())
        })?;
        if current.device.id == device.id {
            return Ok(());
        }

        let session = &self.inner.backend.session;
        {
            let _bracket = ConfigurationBracket::begin(session.as_ref());
            session.remove_input(&current);

            match self.add_input(&device) {
                Ok(input) => {
                    state.video_input = Some(input);
                    if state.capture_mode == CaptureMode::Video {
                        self.apply_hdr_preference(state, &device);
                    }
                }
                Err(e) => {
                    session.add_input(&current);
                    return Err(CaptureError::DeviceChangeFailed(format!(
                        "{} -> {}: {}",
                        current.device.name, device.name, e
                    )));
                }
            }
        }

        self.inner.backend.devices.set_user_preferred_camera(&device);
        self.activate_device(state, &device);
        log::info!("Switched camera to {}", device.name);
        Ok(())
    }

    // ----- focus and exposure -----

    /// Focuses and exposes once at a tap in preview coordinates.
    pub async fn focus_and_expose(&self, tap: Point) -> Result<(), CaptureError> {
        let (device, geometry) = {
            let state = self.inner.state.lock().await;
            let Some(device) = state.active_device().cloned() else {
                return Err(CaptureError::ConfigurationFailed(
                    "no active camera".to_string(),
                ));
            };
            let (width, height) = state.preview_size;
            let geometry = PreviewGeometry {
                width,
                height,
                rotation_angle: *self.inner.published.preview_rotation.borrow(),
                mirrored: device.position == DevicePosition::Front,
            };
            (device, geometry)
        };

        self.apply_focus_exposure(&device, geometry.device_point(tap), FocusIntent::UserInitiated)
    }

    fn apply_focus_exposure(
        &self,
        device: &CaptureDevice,
        point: Point,
        intent: FocusIntent,
    ) -> Result<(), CaptureError> {
        let settings = focus_exposure_settings(device, point, intent);
        self.inner
            .backend
            .devices
            .configure_device(&device.id, DeviceUpdate::FocusExposure(settings))
            .map_err(|e| CaptureError::ConfigurationFailed(e.to_string()))
    }

    /// Size of the preview the taps passed to `focus_and_expose` come from.
    pub async fn set_preview_bounds(&self, width: f64, height: f64) {
        self.inner.state.lock().await.preview_size = (width, height);
    }

    // ----- capture -----

    pub async fn capture_photo(&self, features: PhotoFeatures) -> Result<Photo, CaptureError> {
        {
            let state = self.inner.state.lock().await;
            if !state.is_set_up {
                return Err(CaptureError::ConfigurationFailed(
                    "capture session is not set up".to_string(),
                ));
            }
        }
        // The lock is released so captures can overlap.
        self.inner.photo.capture_photo(features).await
    }

    pub async fn start_recording(&self) -> Result<(), CaptureError> {
        let state = self.inner.state.lock().await;
        if !state.is_set_up || state.capture_mode != CaptureMode::Video {
            return Err(CaptureError::ConfigurationFailed(
                "recording requires video mode".to_string(),
            ));
        }
        let features = MovieFeatures {
            is_hdr_enabled: *self.inner.published.hdr_video_enabled.borrow(),
        };
        self.inner.movie.start_recording(features).await
    }

    pub async fn stop_recording(&self) -> Result<Movie, CaptureError> {
        self.inner.movie.stop_recording().await
    }

    // ----- preferences -----

    /// Records the HDR preference and, in video mode, applies it.
    pub async fn enable_hdr_video(&self, enabled: bool) {
        let mut state = self.inner.state.lock().await;
        state.preferences.is_video_hdr_enabled = enabled;

        let device = state.active_device().cloned();
        match device {
            Some(device) if state.is_set_up && state.capture_mode == CaptureMode::Video => {
                let _bracket = ConfigurationBracket::begin(self.inner.backend.session.as_ref());
                self.apply_hdr_preference(&state, &device);
            }
            _ => {
                self.inner.published.hdr_video_enabled.send_replace(enabled);
            }
        }
        self.refresh_capabilities(&state);
    }

    /// Must be called inside a configuration bracket.
    fn apply_hdr_preference(&self, state: &SessionState, device: &CaptureDevice) {
        let wanted = state.preferences.is_video_hdr_enabled;
        let enabled = if wanted && device.supports_hdr_video {
            match self
                .inner
                .backend
                .devices
                .configure_device(&device.id, DeviceUpdate::ActiveFormat(VideoFormat::Hdr10Bit))
            {
                Ok(()) => true,
                Err(e) => {
                    log::error!("Unable to select HDR format on {}: {}", device.name, e);
                    false
                }
            }
        } else {
            if wanted {
                log::debug!("{} has no 10-bit HDR format", device.name);
            }
            // Resetting the preset drops any custom active format.
            self.inner.backend.session.set_preset(SessionPreset::High);
            false
        };
        self.inner.published.hdr_video_enabled.send_replace(enabled);
    }

    /// Records the live-photo preference and applies it in photo mode.
    pub async fn set_live_photo_enabled(&self, enabled: bool) -> Result<(), CaptureError> {
        let mut state = self.inner.state.lock().await;
        if enabled
            && !self
                .inner
                .backend
                .photo_output
                .is_live_photo_capture_supported()
        {
            return Err(CaptureError::NoLivePhotoSupport);
        }
        state.preferences.is_live_photo_enabled = enabled;
        if state.is_set_up && state.capture_mode == CaptureMode::Photo {
            self.inner.photo.set_live_photo_capture_enabled(enabled)?;
        }
        Ok(())
    }

    fn apply_live_photo_preference(&self, state: &SessionState) {
        let output = &self.inner.backend.photo_output;
        let enabled =
            state.preferences.is_live_photo_enabled && output.is_live_photo_capture_supported();
        output.set_live_photo_capture_enabled(enabled);
    }

    fn refresh_capabilities(&self, state: &SessionState) {
        let capabilities = match state.capture_mode {
            CaptureMode::Photo => self.inner.photo.capabilities(),
            CaptureMode::Video => self.inner.movie.capabilities(),
        };
        self.inner.published.capabilities.send_replace(capabilities);
    }

    fn apply_rotation(&self, angles: RotationAngles) {
        self.inner.published.preview_rotation.send_replace(angles.preview);
        self.inner.photo.set_video_rotation_angle(angles.capture);
        self.inner.movie.set_video_rotation_angle(angles.capture);
    }

    // ----- observables -----

    pub fn activity(&self) -> watch::Receiver<CaptureActivity> {
        self.inner.published.activity.subscribe()
    }

    pub fn capabilities(&self) -> watch::Receiver<CaptureCapabilities> {
        self.inner.published.capabilities.subscribe()
    }

    pub fn is_interrupted(&self) -> watch::Receiver<bool> {
        self.inner.published.interrupted.subscribe()
    }

    pub fn is_hdr_video_enabled(&self) -> watch::Receiver<bool> {
        self.inner.published.hdr_video_enabled.subscribe()
    }

    pub fn preview_rotation_angle(&self) -> watch::Receiver<f64> {
        self.inner.published.preview_rotation.subscribe()
    }

    pub fn current_device(&self) -> watch::Receiver<Option<CaptureDevice>> {
        self.inner.published.current_device.subscribe()
    }

    pub fn capture_mode(&self) -> watch::Receiver<CaptureMode> {
        self.inner.published.capture_mode.subscribe()
    }

    /// Per-capture progress events for every photo capture.
    pub fn photo_events(&self) -> broadcast::Receiver<PhotoCaptureEvent> {
        self.inner.photo.subscribe_events()
    }

    pub fn is_running(&self) -> bool {
        self.inner.backend.session.is_running()
    }

    /// Every camera that can be selected, in cycle order.
    pub fn cameras(&self) -> Vec<CaptureDevice> {
        self.inner.lookup.cameras()
    }
}
