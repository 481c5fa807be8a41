//! Movie recording through the platform movie output.

use super::OutputService;
use crate::errors::{CaptureError, PlatformError};
use crate::platform::MovieOutput;
use crate::timing::RecordingClock;
use crate::types::{
    CaptureActivity, CaptureCapabilities, CaptureDevice, Movie, MovieCodec, MovieFeatures,
    MovieSettings, OutputKind,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

/// Cadence of `MovieCapture` duration updates.
pub const DURATION_TICK: Duration = Duration::from_millis(500);

/// Receives the platform callbacks for one recording.
pub struct MovieRecordingDelegate {
    settings: MovieSettings,
    clock: RecordingClock,
    completion: Option<oneshot::Sender<Result<Movie, CaptureError>>>,
}

impl MovieRecordingDelegate {
    fn new(
        settings: MovieSettings,
        clock: RecordingClock,
    ) -> (Self, oneshot::Receiver<Result<Movie, CaptureError>>) {
        let (tx, rx) = oneshot::channel();
        let delegate = Self {
            settings,
            clock,
            completion: Some(tx),
        };
        (delegate, rx)
    }

    pub fn id(&self) -> Uuid {
        self.settings.id
    }

    pub fn settings(&self) -> &MovieSettings {
        &self.settings
    }

    pub fn did_start_recording(&mut self) {
        log::debug!(
            "Recording {} started writing to {:?}",
            self.id(),
            self.settings.output_path
        );
    }

    /// Final callback; resolves the pending stop.
    pub fn did_finish_recording(mut self, error: Option<PlatformError>) {
        let result = match error {
            Some(error) => Err(CaptureError::CaptureFailed(error.message)),
            None => Ok(Movie {
                id: self.id(),
                path: self.settings.output_path.clone(),
                codec: self.settings.codec,
                duration: self.clock.elapsed(),
                finished_at: chrono::Utc::now(),
            }),
        };
        self.resolve(result);
    }

    fn resolve(&mut self, result: Result<Movie, CaptureError>) {
        if let Some(completion) = self.completion.take() {
            if completion.send(result).is_err() {
                log::debug!("Recording {} finished with nobody waiting", self.id());
            }
        }
    }
}

impl Drop for MovieRecordingDelegate {
    fn drop(&mut self) {
        if self.completion.is_some() {
            log::warn!("Recording {} abandoned by the platform", self.id());
            self.resolve(Err(CaptureError::CaptureFailed(
                "recording abandoned before completion".to_string(),
            )));
        }
    }
}

struct ActiveRecording {
    id: Uuid,
    completion: oneshot::Receiver<Result<Movie, CaptureError>>,
    ticker: JoinHandle<()>,
}

enum RecordingSlot {
    Idle,
    Recording(ActiveRecording),
    /// Stop requested; the platform is still writing the file.
    Finalizing(Uuid),
}

/// Returns the slot to idle and stops the ticker once a stop is over,
/// including when the stopping future is dropped early.
struct FinalizeGuard<'a> {
    slot: &'a Mutex<RecordingSlot>,
    ticker: AbortHandle,
}

impl Drop for FinalizeGuard<'_> {
    fn drop(&mut self) {
        self.ticker.abort();
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = RecordingSlot::Idle;
    }
}

/// Starts and stops recordings and reports recording duration.
pub struct MovieOutputService {
    output: Arc<dyn MovieOutput>,
    activity: Arc<watch::Sender<CaptureActivity>>,
    recording: Mutex<RecordingSlot>,
    hdr_supported: AtomicBool,
    storage_dir: PathBuf,
}

impl MovieOutputService {
    pub fn new(output: Arc<dyn MovieOutput>, storage_dir: impl Into<PathBuf>) -> Self {
        let (activity, _) = watch::channel(CaptureActivity::Idle);
        Self {
            output,
            activity: Arc::new(activity),
            recording: Mutex::new(RecordingSlot::Idle),
            hdr_supported: AtomicBool::new(false),
            storage_dir: storage_dir.into(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, RecordingSlot> {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// HEVC when the output offers it, H.264 otherwise.
    pub fn create_settings(&self, features: &MovieFeatures) -> MovieSettings {
        let codec = if self
            .output
            .available_movie_codecs()
            .contains(&MovieCodec::Hevc)
        {
            MovieCodec::Hevc
        } else {
            MovieCodec::H264
        };
        let id = Uuid::new_v4();
        MovieSettings {
            id,
            codec,
            output_path: self.storage_dir.join(format!("{id}.mov")),
            is_hdr: features.is_hdr_enabled,
        }
    }

    /// Begin recording. A call while already recording is ignored; a call
    /// while the previous movie is still being finalized is refused.
    pub async fn start_recording(&self, features: MovieFeatures) -> Result<(), CaptureError> {
        let mut slot = self.slot();
        match &*slot {
            RecordingSlot::Recording(active) => {
                log::warn!("Recording {} already in progress", active.id);
                return Ok(());
            }
            RecordingSlot::Finalizing(id) => {
                return Err(CaptureError::ConfigurationFailed(format!(
                    "recording {id} is still being finalized"
                )));
            }
            RecordingSlot::Idle => {}
        }
        if self.output.is_recording() {
            return Err(CaptureError::ConfigurationFailed(
                "movie output is still recording".to_string(),
            ));
        }

        let settings = self.create_settings(&features);
        let id = settings.id;
        let clock = RecordingClock::start();
        let (delegate, completion) = MovieRecordingDelegate::new(settings.clone(), clock.clone());

        log::info!(
            "Starting recording {} ({:?}) to {:?}",
            id,
            settings.codec,
            settings.output_path
        );
        self.output.start_recording(settings, delegate);

        let activity = self.activity.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(DURATION_TICK);
            loop {
                interval.tick().await;
                activity.send_replace(CaptureActivity::MovieCapture {
                    duration: clock.elapsed(),
                });
            }
        });

        *slot = RecordingSlot::Recording(ActiveRecording {
            id,
            completion,
            ticker,
        });
        Ok(())
    }

    /// End the current recording and wait for the finished movie.
    ///
    /// The service keeps reporting a recording until the platform has
    /// finished writing the file.
    pub async fn stop_recording(&self) -> Result<Movie, CaptureError> {
        let active = {
            let mut slot = self.slot();
            match std::mem::replace(&mut *slot, RecordingSlot::Idle) {
                RecordingSlot::Recording(active) => {
                    *slot = RecordingSlot::Finalizing(active.id);
                    active
                }
                other => {
                    *slot = other;
                    return Err(CaptureError::ConfigurationFailed(
                        "no recording in progress".to_string(),
                    ));
                }
            }
        };
        let ActiveRecording {
            id,
            completion,
            ticker,
        } = active;
        let guard = FinalizeGuard {
            slot: &self.recording,
            ticker: ticker.abort_handle(),
        };

        self.output.stop_recording();
        let result = completion.await.unwrap_or_else(|_| {
            Err(CaptureError::CaptureFailed(
                "movie output dropped the recording".to_string(),
            ))
        });

        ticker.abort();
        let _ = ticker.await;
        self.activity.send_replace(CaptureActivity::Idle);
        drop(guard);

        match &result {
            Ok(movie) => log::info!(
                "Recording {} finished after {:.1}s",
                id,
                movie.duration.as_secs_f64()
            ),
            Err(e) => log::error!("Recording {} failed: {}", id, e),
        }
        result
    }

    /// True from the start of a recording until its file is finalized.
    pub fn is_recording(&self) -> bool {
        !matches!(*self.slot(), RecordingSlot::Idle) || self.output.is_recording()
    }
}

impl OutputService for MovieOutputService {
    fn kind(&self) -> OutputKind {
        OutputKind::Movie
    }

    fn activity(&self) -> watch::Receiver<CaptureActivity> {
        self.activity.subscribe()
    }

    fn capabilities(&self) -> CaptureCapabilities {
        CaptureCapabilities {
            is_live_photo_capture_supported: false,
            is_hdr_supported: self.hdr_supported.load(Ordering::Relaxed),
            is_pro_raw_supported: false,
        }
    }

    fn set_video_rotation_angle(&self, angle: f64) {
        self.output.set_rotation_angle(angle);
    }

    fn update_configuration(&self, device: &CaptureDevice) {
        self.hdr_supported
            .store(device.supports_hdr_video, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;
    use crate::testing::fixture_devices;

    #[test]
    fn test_codec_prefers_hevc() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
        let movies = MovieOutputService::new(platform.clone(), std::env::temp_dir());
        assert_eq!(
            movies.create_settings(&MovieFeatures::default()).codec,
            MovieCodec::Hevc
        );

        platform.set_movie_codecs(vec![MovieCodec::H264]);
        let settings = movies.create_settings(&MovieFeatures {
            is_hdr_enabled: true,
        });
        assert_eq!(settings.codec, MovieCodec::H264);
        assert!(settings.is_hdr);
        assert_eq!(settings.output_path.extension().unwrap(), "mov");
    }

    #[tokio::test]
    async fn test_stop_without_recording_is_error() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
        let movies = MovieOutputService::new(platform, std::env::temp_dir());
        assert!(matches!(
            movies.stop_recording().await,
            Err(CaptureError::ConfigurationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_record_reports_duration_then_idle() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
        let movies = MovieOutputService::new(platform.clone(), std::env::temp_dir());
        let mut activity = movies.activity();

        movies.start_recording(MovieFeatures::default()).await.unwrap();
        activity.changed().await.unwrap();
        assert!(activity.borrow_and_update().is_recording());
        assert!(platform.is_recording_movie());

        // Second start is ignored.
        movies.start_recording(MovieFeatures::default()).await.unwrap();

        let movie = movies.stop_recording().await.unwrap();
        assert_eq!(movie.codec, MovieCodec::Hevc);
        assert!(!movies.is_recording());
        assert_eq!(*activity.borrow(), CaptureActivity::Idle);
        assert_eq!(platform.movies_started(), 1);
    }

    #[tokio::test]
    async fn test_finalizing_recording_counts_as_recording() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
        let movies = Arc::new(MovieOutputService::new(platform.clone(), std::env::temp_dir()));
        movies.start_recording(MovieFeatures::default()).await.unwrap();
        platform.hold_recording_finish(true);

        let stopping = tokio::spawn({
            let movies = movies.clone();
            async move { movies.stop_recording().await }
        });
        while platform.is_recording_movie() {
            tokio::task::yield_now().await;
        }
        assert!(movies.is_recording());
        assert!(movies
            .start_recording(MovieFeatures::default())
            .await
            .is_err());
        assert!(matches!(
            movies.stop_recording().await,
            Err(CaptureError::ConfigurationFailed(_))
        ));

        platform.finish_held_recording();
        stopping.await.unwrap().unwrap();
        assert!(!movies.is_recording());
        assert_eq!(platform.movies_started(), 1);
    }

    #[test]
    fn test_hdr_capability_follows_device() {
        let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
        let movies = MovieOutputService::new(platform, std::env::temp_dir());
        let devices = fixture_devices();

        movies.update_configuration(&devices.cameras[0]);
        assert!(movies.capabilities().is_hdr_supported);

        let webcam = devices
            .cameras
            .iter()
            .find(|d| !d.supports_hdr_video)
            .unwrap();
        movies.update_configuration(webcam);
        assert!(!movies.capabilities().is_hdr_supported);
    }
}
