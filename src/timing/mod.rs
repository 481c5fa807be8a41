//! Monotonic clock for recording durations.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Elapsed-time clock started when a recording begins.
///
/// Clones share the same start instant so the duration ticker and the
/// finished movie agree on elapsed time.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    start: Arc<Instant>,
}

impl RecordingClock {
    pub fn start() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for RecordingClock {
    fn default() -> Self {
        Self::start()
    }
}
