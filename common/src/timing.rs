//! Frame timing for the instantaneous frames-per-second readout.
//!
use std::time::{Duration, Instant};

use crate::decimal::fixed_1;

/// Timestamp of the previously completed frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameTiming {
    last: Instant,
}

impl FrameTiming {
    /// Start timing at `now`, usually right before the first frame is requested.
    pub fn start(now: Instant) -> Self {
        Self { last: now }
    }

    /// Record the completion of a frame and return the instantaneous FPS.
    ///
    /// Returns `None` if no time has passed since the previous frame.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last);
        self.last = now;
        fps_from_elapsed(elapsed)
    }

    pub fn last(&self) -> Instant {
        self.last
    }
}

/// `1000 / elapsed_ms`.
pub fn fps_from_elapsed(elapsed: Duration) -> Option<f64> {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    if elapsed_ms <= 0.0 {
        return None;
    }

    Some(1000.0 / elapsed_ms)
}

/// Format for the readout, one decimal place.
pub fn format_fps(fps: Option<f64>) -> String {
    match fps {
        Some(fps) => fixed_1(fps),
        None => "--".to_owned(),
    }
}
