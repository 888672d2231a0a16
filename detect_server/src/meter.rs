//! Frame counters of the detection session, logged as rates.
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};
use tokio_util::sync::CancellationToken;

/// How often the rates are logged.
const LOG_PERIOD: Duration = Duration::from_secs(2);

pub static METER: FrameMeter = FrameMeter::new();

/// Stage a frame reached before it was counted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameStage {
    /// Decoded from the camera.
    Captured,
    /// Composed and published to viewers.
    Rendered,
    /// Dropped by the failure policy.
    Failed,
}

/// Counts per [`FrameStage`] since the last [`FrameMeter::take`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FrameCounts {
    pub captured: u64,
    pub rendered: u64,
    pub failed: u64,
}

impl FrameCounts {
    fn log(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        if self.captured > 0 {
            log::info!("Capturing at {:.2} fps", self.captured as f64 / secs);
        }
        if self.rendered > 0 {
            log::info!("Rendering at {:.2} fps", self.rendered as f64 / secs);
        }
        if self.failed > 0 {
            log::warn!("{} frames failed in the last {:.1}s", self.failed, secs);
        }
    }
}

pub struct FrameMeter {
    counters: [AtomicU64; 3],
}

impl FrameMeter {
    pub const fn new() -> Self {
        Self {
            counters: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    pub fn count(&self, stage: FrameStage) {
        self.counters[stage as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Read and reset all counters.
    pub fn take(&self) -> FrameCounts {
        let take = |stage: FrameStage| self.counters[stage as usize].swap(0, Ordering::Relaxed);
        FrameCounts {
            captured: take(FrameStage::Captured),
            rendered: take(FrameStage::Rendered),
            failed: take(FrameStage::Failed),
        }
    }
}

impl Default for FrameMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Log frame rates of [`METER`] until `cancel` fires.
pub fn spawn_meter_logger(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(LOG_PERIOD);
        log_interval.tick().await;

        let mut since = Instant::now();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = log_interval.tick() => {}
            }

            METER.take().log(since.elapsed());
            since = Instant::now();
        }
    })
}
