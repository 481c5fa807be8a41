//! In-memory capture stack.
//!
//! `SimulatedPlatform` implements every platform trait so the capture
//! service can run without hardware. Tests and the CLI steer it through the
//! inherent methods: inject failures, post notifications, rotate devices,
//! change the system-preferred camera and inspect the session graph.

use super::{CaptureSessionGraph, DeviceProvider, MovieOutput, PhotoOutput};
use crate::check_invariant;
use crate::errors::PlatformError;
use crate::output::movie::MovieRecordingDelegate;
use crate::output::photo::PhotoCaptureDelegate;
use crate::permissions::PermissionStatus;
use crate::testing::{fixture_devices, synthetic_photo_jpeg};
use crate::types::{
    CaptureDevice, DeviceInput, DevicePosition, DeviceUpdate, Dimensions, MediaType, MovieCodec,
    MovieSettings, OutputKind, PhotoCodec, PhotoSettings, RotationAngles, SessionNotification,
    SessionPreset,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};

const NOTIFICATION_CAPACITY: usize = 32;
const SYNTHETIC_PHOTO_SIZE: (u32, u32) = (64, 48);

/// How the simulated photo output answers the next captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoOutcome {
    Deliver,
    /// Finish without producing photo data.
    NoData,
    Fail(String),
    /// Keep captures pending until [`SimulatedPlatform::complete_held_photos`].
    Hold,
}

/// Point-in-time view of the simulated session graph.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub inputs: Vec<String>,
    pub video_inputs: Vec<String>,
    pub outputs: Vec<OutputKind>,
    pub preset: Option<SessionPreset>,
    pub running: bool,
    pub configuration_depth: u32,
    pub begin_count: u32,
    pub commit_count: u32,
    pub add_input_count: u32,
    pub start_running_count: u32,
}

impl SessionSnapshot {
    pub fn has_input(&self, device_id: &str) -> bool {
        self.inputs.iter().any(|id| id == device_id)
    }

    pub fn has_output(&self, output: OutputKind) -> bool {
        self.outputs.contains(&output)
    }
}

struct SimState {
    cameras: Vec<CaptureDevice>,
    microphones: Vec<CaptureDevice>,
    user_preferred: Option<CaptureDevice>,
    authorization: HashMap<MediaType, PermissionStatus>,
    access_response: PermissionStatus,
    access_requests: u32,
    failing_inputs: HashSet<String>,
    failing_outputs: HashSet<OutputKind>,
    failing_device_config: HashSet<String>,
    device_updates: Vec<(String, DeviceUpdate)>,

    inputs: Vec<DeviceInput>,
    outputs: Vec<OutputKind>,
    preset: Option<SessionPreset>,
    running: bool,
    configuration_depth: u32,
    begin_count: u32,
    commit_count: u32,
    add_input_count: u32,
    start_running_count: u32,

    live_photo_supported: bool,
    live_photo_enabled: bool,
    pro_raw_supported: bool,
    photo_codecs: Vec<PhotoCodec>,
    max_photo_dimensions: Option<Dimensions>,
    photo_rotation: f64,
    photo_outcome: PhotoOutcome,
    photos_requested: Vec<PhotoSettings>,
    held_photos: Vec<PhotoCaptureDelegate>,
    photo_sequence: u64,

    movie_codecs: Vec<MovieCodec>,
    movie_rotation: f64,
    active_movie: Option<MovieRecordingDelegate>,
    hold_movie_finish: bool,
    finalizing_movie: Option<MovieRecordingDelegate>,
    fail_next_recording: Option<String>,
    movies_started: u32,
}

pub struct SimulatedPlatform {
    state: Mutex<SimState>,
    system_preferred: watch::Sender<Option<CaptureDevice>>,
    rotations: Mutex<HashMap<String, watch::Sender<RotationAngles>>>,
    notifications: broadcast::Sender<SessionNotification>,
}

impl SimulatedPlatform {
    pub fn new(cameras: Vec<CaptureDevice>, microphones: Vec<CaptureDevice>) -> Self {
        let (system_preferred, _) = watch::channel(None);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let authorization = HashMap::from([
            (MediaType::Video, PermissionStatus::Granted),
            (MediaType::Audio, PermissionStatus::Granted),
        ]);

        Self {
            state: Mutex::new(SimState {
                cameras,
                microphones,
                user_preferred: None,
                authorization,
                access_response: PermissionStatus::Granted,
                access_requests: 0,
                failing_inputs: HashSet::new(),
                failing_outputs: HashSet::new(),
                failing_device_config: HashSet::new(),
                device_updates: Vec::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                preset: None,
                running: false,
                configuration_depth: 0,
                begin_count: 0,
                commit_count: 0,
                add_input_count: 0,
                start_running_count: 0,
                live_photo_supported: true,
                live_photo_enabled: false,
                pro_raw_supported: true,
                photo_codecs: vec![PhotoCodec::Hevc, PhotoCodec::Jpeg],
                max_photo_dimensions: None,
                photo_rotation: 0.0,
                photo_outcome: PhotoOutcome::Deliver,
                photos_requested: Vec::new(),
                held_photos: Vec::new(),
                photo_sequence: 0,
                movie_codecs: vec![MovieCodec::Hevc, MovieCodec::H264],
                movie_rotation: 0.0,
                active_movie: None,
                hold_movie_finish: false,
                finalizing_movie: None,
                fail_next_recording: None,
                movies_started: 0,
            }),
            system_preferred,
            rotations: Mutex::new(HashMap::new()),
            notifications,
        }
    }

    /// Two back cameras, a front camera, a USB webcam and one microphone.
    pub fn with_fixture_devices() -> Self {
        let devices = fixture_devices();
        Self::new(devices.cameras, devices.microphones)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rotation_sender(&self, device: &CaptureDevice) -> watch::Receiver<RotationAngles> {
        let mut rotations = self.rotations.lock().unwrap_or_else(PoisonError::into_inner);
        rotations
            .entry(device.id.clone())
            .or_insert_with(|| watch::channel(default_rotation(device)).0)
            .subscribe()
    }

    // ----- device steering -----

    pub fn set_system_preferred_camera(&self, device: Option<CaptureDevice>) {
        self.system_preferred.send_replace(device);
    }

    pub fn user_preferred_camera(&self) -> Option<CaptureDevice> {
        self.state().user_preferred.clone()
    }

    pub fn set_authorization(&self, media: MediaType, status: PermissionStatus) {
        self.state().authorization.insert(media, status);
    }

    /// Status returned by the next access prompts.
    pub fn set_access_response(&self, status: PermissionStatus) {
        self.state().access_response = status;
    }

    pub fn access_requests(&self) -> u32 {
        self.state().access_requests
    }

    /// Make `can_add_input` refuse this device.
    pub fn fail_input_for(&self, device_id: &str) {
        self.state().failing_inputs.insert(device_id.to_string());
    }

    pub fn clear_input_failures(&self) {
        self.state().failing_inputs.clear();
    }

    pub fn fail_output(&self, output: OutputKind) {
        self.state().failing_outputs.insert(output);
    }

    pub fn fail_device_configuration(&self, device_id: &str) {
        self.state()
            .failing_device_config
            .insert(device_id.to_string());
    }

    pub fn device_updates(&self) -> Vec<(String, DeviceUpdate)> {
        self.state().device_updates.clone()
    }

    pub fn set_rotation(&self, device_id: &str, angles: RotationAngles) {
        let rotations = self.rotations.lock().unwrap_or_else(PoisonError::into_inner);
        match rotations.get(device_id) {
            Some(sender) => {
                sender.send_replace(angles);
            }
            None => log::debug!("No rotation coordinator for {}", device_id),
        }
    }

    // ----- session steering -----

    pub fn post_notification(&self, notification: SessionNotification) {
        if self.notifications.send(notification).is_err() {
            log::debug!("Notification posted with no observers");
        }
    }

    /// The platform stops the session on its own (e.g. media services died).
    pub fn stop_session(&self) {
        self.state().running = false;
    }

    pub fn session_snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            inputs: state.inputs.iter().map(|i| i.device.id.clone()).collect(),
            video_inputs: state
                .inputs
                .iter()
                .filter(|i| i.is_video())
                .map(|i| i.device.id.clone())
                .collect(),
            outputs: state.outputs.clone(),
            preset: state.preset,
            running: state.running,
            configuration_depth: state.configuration_depth,
            begin_count: state.begin_count,
            commit_count: state.commit_count,
            add_input_count: state.add_input_count,
            start_running_count: state.start_running_count,
        }
    }

    // ----- output steering -----

    pub fn set_live_photo_supported(&self, supported: bool) {
        let mut state = self.state();
        state.live_photo_supported = supported;
        if !supported {
            state.live_photo_enabled = false;
        }
    }

    pub fn set_pro_raw_supported(&self, supported: bool) {
        self.state().pro_raw_supported = supported;
    }

    pub fn set_photo_codecs(&self, codecs: Vec<PhotoCodec>) {
        self.state().photo_codecs = codecs;
    }

    pub fn set_movie_codecs(&self, codecs: Vec<MovieCodec>) {
        self.state().movie_codecs = codecs;
    }

    pub fn set_photo_outcome(&self, outcome: PhotoOutcome) {
        self.state().photo_outcome = outcome;
    }

    pub fn photos_requested(&self) -> Vec<PhotoSettings> {
        self.state().photos_requested.clone()
    }

    pub fn held_photo_count(&self) -> usize {
        self.state().held_photos.len()
    }

    /// Deliver every held capture.
    pub fn complete_held_photos(&self) {
        let held = std::mem::take(&mut self.state().held_photos);
        for delegate in held {
            let sequence = self.next_photo_sequence();
            tokio::spawn(run_photo_capture(delegate, PhotoOutcome::Deliver, sequence));
        }
    }

    pub fn photo_rotation_angle(&self) -> f64 {
        self.state().photo_rotation
    }

    pub fn movie_rotation_angle(&self) -> f64 {
        self.state().movie_rotation
    }

    pub fn max_photo_dimensions(&self) -> Option<Dimensions> {
        self.state().max_photo_dimensions
    }

    pub fn is_recording_movie(&self) -> bool {
        self.state().active_movie.is_some()
    }

    pub fn movies_started(&self) -> u32 {
        self.state().movies_started
    }

    /// Keep stopped recordings finalizing until [`finish_held_recording`].
    ///
    /// [`finish_held_recording`]: SimulatedPlatform::finish_held_recording
    pub fn hold_recording_finish(&self, hold: bool) {
        self.state().hold_movie_finish = hold;
    }

    /// Completes a recording kept back by [`hold_recording_finish`].
    ///
    /// [`hold_recording_finish`]: SimulatedPlatform::hold_recording_finish
    pub fn finish_held_recording(&self) {
        let (delegate, failure) = {
            let mut state = self.state();
            (state.finalizing_movie.take(), state.fail_next_recording.take())
        };
        if let Some(delegate) = delegate {
            delegate.did_finish_recording(failure.map(PlatformError::new));
        }
    }

    pub fn fail_next_recording(&self, message: impl Into<String>) {
        self.state().fail_next_recording = Some(message.into());
    }

    fn next_photo_sequence(&self) -> u64 {
        let mut state = self.state();
        state.photo_sequence += 1;
        state.photo_sequence
    }
}

fn default_rotation(device: &CaptureDevice) -> RotationAngles {
    match device.position {
        DevicePosition::Back | DevicePosition::Front => RotationAngles {
            preview: 90.0,
            capture: 90.0,
        },
        _ => RotationAngles::default(),
    }
}

async fn run_photo_capture(mut delegate: PhotoCaptureDelegate, outcome: PhotoOutcome, sequence: u64) {
    delegate.will_begin_capture();
    tokio::task::yield_now().await;
    delegate.will_capture_photo();
    delegate.did_capture_photo();

    let error = match outcome {
        PhotoOutcome::Deliver | PhotoOutcome::Hold => {
            let (width, height) = SYNTHETIC_PHOTO_SIZE;
            let data = synthetic_photo_jpeg(sequence, width, height)
                .map_err(|e| PlatformError::new(format!("synthetic encode failed: {e}")));
            delegate.did_finish_processing_photo(data);
            None
        }
        PhotoOutcome::NoData => None,
        PhotoOutcome::Fail(message) => Some(PlatformError::new(message)),
    };

    if let Some(path) = delegate.settings().live_photo_movie_path.clone() {
        delegate.did_finish_recording_live_photo_movie();
        delegate.did_finish_processing_live_photo_movie(Ok(path));
    }
    delegate.did_finish_capture(error);
}

impl DeviceProvider for SimulatedPlatform {
    fn video_devices(&self) -> Vec<CaptureDevice> {
        self.state().cameras.clone()
    }

    fn audio_devices(&self) -> Vec<CaptureDevice> {
        self.state().microphones.clone()
    }

    fn system_preferred_camera(&self) -> Option<CaptureDevice> {
        self.system_preferred.borrow().clone()
    }

    fn watch_system_preferred_camera(&self) -> watch::Receiver<Option<CaptureDevice>> {
        self.system_preferred.subscribe()
    }

    fn set_user_preferred_camera(&self, device: &CaptureDevice) {
        self.state().user_preferred = Some(device.clone());
    }

    fn authorization_status(&self, media: MediaType) -> PermissionStatus {
        self.state()
            .authorization
            .get(&media)
            .copied()
            .unwrap_or(PermissionStatus::NotDetermined)
    }

    fn request_access(&self, media: MediaType) -> PermissionStatus {
        let mut state = self.state();
        state.access_requests += 1;
        let status = state.access_response;
        state.authorization.insert(media, status);
        status
    }

    fn configure_device(&self, device_id: &str, update: DeviceUpdate) -> Result<(), PlatformError> {
        let mut state = self.state();
        if !state.cameras.iter().any(|d| d.id == device_id) {
            return Err(PlatformError::new(format!("no such device: {device_id}")));
        }
        if state.failing_device_config.contains(device_id) {
            return Err(PlatformError::new(format!(
                "unable to lock {device_id} for configuration"
            )));
        }
        state.device_updates.push((device_id.to_string(), update));
        Ok(())
    }

    fn rotation_coordinator(&self, device: &CaptureDevice) -> watch::Receiver<RotationAngles> {
        self.rotation_sender(device)
    }
}

impl CaptureSessionGraph for SimulatedPlatform {
    fn begin_configuration(&self) {
        let mut state = self.state();
        state.configuration_depth += 1;
        state.begin_count += 1;
    }

    fn commit_configuration(&self) {
        let mut state = self.state();
        check_invariant!(
            state.configuration_depth > 0,
            "Commit pairs with a preceding begin",
            "simulated session"
        );
        state.configuration_depth -= 1;
        state.commit_count += 1;
    }

    fn set_preset(&self, preset: SessionPreset) {
        self.state().preset = Some(preset);
    }

    fn can_add_input(&self, input: &DeviceInput) -> bool {
        let state = self.state();
        !state.failing_inputs.contains(input.device_id())
            && !state.inputs.iter().any(|i| i.device_id() == input.device_id())
    }

    fn add_input(&self, input: &DeviceInput) {
        let mut state = self.state();
        state.inputs.push(input.clone());
        state.add_input_count += 1;
        let video_inputs = state.inputs.iter().filter(|i| i.is_video()).count();
        check_invariant!(
            video_inputs <= 1,
            "Session holds at most one video input",
            "simulated session"
        );
    }

    fn remove_input(&self, input: &DeviceInput) {
        self.state()
            .inputs
            .retain(|i| i.device_id() != input.device_id());
    }

    fn can_add_output(&self, output: OutputKind) -> bool {
        let state = self.state();
        !state.failing_outputs.contains(&output) && !state.outputs.contains(&output)
    }

    fn add_output(&self, output: OutputKind) {
        let mut state = self.state();
        if !state.outputs.contains(&output) {
            state.outputs.push(output);
        }
    }

    fn remove_output(&self, output: OutputKind) {
        self.state().outputs.retain(|o| *o != output);
    }

    fn has_output(&self, output: OutputKind) -> bool {
        self.state().outputs.contains(&output)
    }

    fn start_running(&self) {
        let mut state = self.state();
        state.running = true;
        state.start_running_count += 1;
    }

    fn is_running(&self) -> bool {
        self.state().running
    }

    fn notifications(&self) -> broadcast::Receiver<SessionNotification> {
        self.notifications.subscribe()
    }
}

impl PhotoOutput for SimulatedPlatform {
    fn is_live_photo_capture_supported(&self) -> bool {
        self.state().live_photo_supported
    }

    fn is_live_photo_capture_enabled(&self) -> bool {
        self.state().live_photo_enabled
    }

    fn set_live_photo_capture_enabled(&self, enabled: bool) {
        let mut state = self.state();
        state.live_photo_enabled = enabled && state.live_photo_supported;
    }

    fn is_pro_raw_supported(&self) -> bool {
        self.state().pro_raw_supported
    }

    fn available_photo_codecs(&self) -> Vec<PhotoCodec> {
        self.state().photo_codecs.clone()
    }

    fn set_max_photo_dimensions(&self, dimensions: Option<Dimensions>) {
        self.state().max_photo_dimensions = dimensions;
    }

    fn set_rotation_angle(&self, angle: f64) {
        self.state().photo_rotation = angle;
    }

    fn capture_photo(&self, settings: PhotoSettings, delegate: PhotoCaptureDelegate) {
        let outcome = {
            let mut state = self.state();
            state.photos_requested.push(settings);
            if state.photo_outcome == PhotoOutcome::Hold {
                state.held_photos.push(delegate);
                return;
            }
            state.photo_outcome.clone()
        };
        let sequence = self.next_photo_sequence();
        tokio::spawn(run_photo_capture(delegate, outcome, sequence));
    }
}

impl MovieOutput for SimulatedPlatform {
    fn available_movie_codecs(&self) -> Vec<MovieCodec> {
        self.state().movie_codecs.clone()
    }

    fn set_rotation_angle(&self, angle: f64) {
        self.state().movie_rotation = angle;
    }

    fn is_recording(&self) -> bool {
        let state = self.state();
        state.active_movie.is_some() || state.finalizing_movie.is_some()
    }

    fn start_recording(&self, _settings: MovieSettings, mut delegate: MovieRecordingDelegate) {
        delegate.did_start_recording();
        let mut state = self.state();
        state.movies_started += 1;
        state.active_movie = Some(delegate);
    }

    fn stop_recording(&self) {
        let (delegate, failure) = {
            let mut state = self.state();
            let delegate = state.active_movie.take();
            if state.hold_movie_finish {
                state.finalizing_movie = delegate;
                return;
            }
            (delegate, state.fail_next_recording.take())
        };
        match delegate {
            Some(delegate) => delegate.did_finish_recording(failure.map(PlatformError::new)),
            None => log::debug!("stop_recording with no active recording"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants::times_checked;

    #[test]
    fn test_snapshot_tracks_inputs_and_outputs() {
        let platform = SimulatedPlatform::with_fixture_devices();
        let camera = DeviceInput::new(platform.video_devices()[0].clone());
        platform.begin_configuration();
        assert!(platform.can_add_input(&camera));
        platform.add_input(&camera);
        platform.add_output(OutputKind::Photo);
        platform.commit_configuration();

        let snapshot = platform.session_snapshot();
        assert!(snapshot.has_input("back-wide"));
        assert!(snapshot.has_output(OutputKind::Photo));
        assert_eq!(snapshot.configuration_depth, 0);
        assert!(times_checked("Session holds at most one video input") >= 1);
    }

    #[test]
    fn test_failed_input_cannot_be_added() {
        let platform = SimulatedPlatform::with_fixture_devices();
        platform.fail_input_for("usb-webcam");
        let webcam = DeviceInput::new(CaptureDevice::external("usb-webcam", "USB Webcam"));
        assert!(!platform.can_add_input(&webcam));
    }

    #[test]
    #[should_panic(expected = "at most one video input")]
    fn test_second_video_input_violates_invariant() {
        let platform = SimulatedPlatform::with_fixture_devices();
        let devices = platform.video_devices();
        platform.add_input(&DeviceInput::new(devices[0].clone()));
        platform.add_input(&DeviceInput::new(devices[1].clone()));
    }

    #[test]
    fn test_rotation_defaults_by_position() {
        let platform = SimulatedPlatform::with_fixture_devices();
        let devices = platform.video_devices();
        let back = platform.rotation_coordinator(&devices[0]);
        assert_eq!(back.borrow().preview, 90.0);

        let webcam = devices.iter().find(|d| d.id == "usb-webcam").unwrap();
        assert_eq!(platform.rotation_coordinator(webcam).borrow().preview, 0.0);
    }

    #[test]
    fn test_configure_unknown_device_fails() {
        let platform = SimulatedPlatform::with_fixture_devices();
        let update = DeviceUpdate::ActiveFormat(crate::types::VideoFormat::Hdr10Bit);
        assert!(platform.configure_device("nope", update).is_err());
        assert!(platform.configure_device("back-wide", update).is_ok());
        assert_eq!(platform.device_updates().len(), 1);
    }
}
