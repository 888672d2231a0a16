//! Capture/inference driver.
//!
//! Acquires the camera, loads the model once and then runs one detection per display refresh
//! until cancelled. All state that outlives a frame lives in [`SessionState`], which goes into
//! the loop and comes back out of it.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use cam_capture::{CameraConfig, VideoSource};
use common::{Detection, FrameTiming};
use image::RgbImage;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{DetectionError, MediaAccessError, SessionError},
    meter::{FrameStage, METER},
    nn::{load_model, DetectModel, ModelOptions},
    presenter::{Present, SessionChannels, SessionStatus},
};

/// Source of decoded frames with fixed intrinsic dimensions.
pub trait FrameSource: Send + Sync {
    fn intrinsic_size(&self) -> (u32, u32);

    /// Capture and decode the current frame.
    fn capture(&self) -> Result<RgbImage, DetectionError>;
}

impl FrameSource for VideoSource {
    fn intrinsic_size(&self) -> (u32, u32) {
        VideoSource::intrinsic_size(self)
    }

    fn capture(&self) -> Result<RgbImage, DetectionError> {
        let frame = VideoSource::capture(self)
            .map_err(|err| DetectionError::Capture(err.to_string()))?;
        turbojpeg::decompress_image(&frame[..])
            .map_err(|err| DetectionError::Decode(err.to_string()))
    }
}

/// Open the camera and wait until its intrinsic dimensions are known.
pub async fn acquire_video_source(
    config: CameraConfig,
    ready_timeout: Duration,
) -> Result<VideoSource, MediaAccessError> {
    let device = config.device.clone();
    let acquire = tokio::task::spawn_blocking(move || cam_capture::acquire_video_source(&config));

    match tokio::time::timeout(ready_timeout, acquire).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(MediaAccessError::NotReady(join_err.to_string())),
        Err(_) => Err(MediaAccessError::NotReady(format!(
            "no frame from {device} within {ready_timeout:?}"
        ))),
    }
}

/// Loop settings.
#[derive(Clone, Copy, Debug)]
pub struct LoopConfig {
    /// Display refresh rate the loop is bound to.
    pub refresh_hz: u32,
    /// Failed frames in a row after which the loop gives up.
    pub max_consecutive_failures: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 60,
            max_consecutive_failures: 30,
        }
    }
}

impl LoopConfig {
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.refresh_hz.max(1)))
    }
}

/// State carried from one frame to the next.
#[derive(Clone, Copy, Debug)]
pub struct SessionState {
    pub timing: FrameTiming,
    pub frames: u64,
    pub last_fps: Option<f64>,
    pub consecutive_failures: u32,
}

impl SessionState {
    pub fn start(now: Instant) -> Self {
        Self {
            timing: FrameTiming::start(now),
            frames: 0,
            last_fps: None,
            consecutive_failures: 0,
        }
    }
}

/// Run detections until `cancel` fires.
///
/// Every iteration waits for the next refresh tick, captures and runs the model on a blocking
/// thread and hands the result to `presenter`. Only one iteration is in flight at a time. A
/// failed frame is skipped; `max_consecutive_failures` failures in a row end the loop.
pub async fn run_detection_loop<S, M, P>(
    source: Arc<S>,
    model: Arc<M>,
    presenter: &mut P,
    mut session: SessionState,
    config: &LoopConfig,
    cancel: &CancellationToken,
) -> Result<SessionState, DetectionError>
where
    S: FrameSource + 'static,
    M: DetectModel + 'static,
    P: Present,
{
    let (width, height) = source.intrinsic_size();
    if width == 0 || height == 0 {
        return Err(DetectionError::Capture("video source is not ready".to_owned()));
    }

    let mut refresh = interval(config.refresh_period());
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = refresh.tick() => {}
        }

        let detection = {
            let source = Arc::clone(&source);
            let model = Arc::clone(&model);
            tokio::task::spawn_blocking(move || {
                let frame = source.capture()?;
                METER.count(FrameStage::Captured);
                let detections = model.detect(&frame)?;
                Ok::<(RgbImage, Vec<Detection>), DetectionError>((frame, detections))
            })
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = detection => res
                .map_err(|err| DetectionError::TaskFailed(err.to_string()))
                .and_then(|res| res),
        };

        let outcome = result.and_then(|(frame, detections)| {
            let fps = session.timing.tick(Instant::now());
            session.last_fps = fps;
            log::debug!("{} detections, {:?} fps", detections.len(), fps);
            presenter.present(frame, &detections, fps)
        });

        match outcome {
            Ok(presented) => {
                session.consecutive_failures = 0;
                if presented {
                    session.frames += 1;
                }
            }
            Err(err) => {
                METER.count(FrameStage::Failed);
                session.consecutive_failures += 1;
                log::warn!(
                    "Skipping frame ({} in a row): {}",
                    session.consecutive_failures,
                    err
                );
                if session.consecutive_failures >= config.max_consecutive_failures {
                    return Err(DetectionError::TooManyFailures(session.consecutive_failures));
                }
            }
        }
    }

    log::info!("Detection loop stopped after {} frames", session.frames);

    Ok(session)
}

/// Everything needed to set up a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub camera: CameraConfig,
    pub ready_timeout: Duration,
    pub model: ModelOptions,
    pub detection_loop: LoopConfig,
}

/// Acquire the camera, load the model and run the detection loop.
///
/// Setup failures are logged and end the session before the loop starts. The outcome is
/// reflected in the session status shown on the page.
pub async fn run_session<P: Present>(
    config: SessionConfig,
    presenter: &mut P,
    channels: &SessionChannels,
    cancel: &CancellationToken,
) -> Result<SessionState, SessionError> {
    let result = setup_and_run(config, presenter, channels, cancel).await;

    match &result {
        Ok(_) => channels.set_status(SessionStatus::Stopped),
        Err(err) => {
            log::error!("Detection session failed: {}", err);
            channels.set_status(SessionStatus::Failed(err.to_string()));
        }
    }

    result
}

async fn setup_and_run<P: Present>(
    config: SessionConfig,
    presenter: &mut P,
    channels: &SessionChannels,
    cancel: &CancellationToken,
) -> Result<SessionState, SessionError> {
    let SessionConfig {
        camera,
        ready_timeout,
        model,
        detection_loop,
    } = config;

    let setup = async move {
        let source = acquire_video_source(camera, ready_timeout).await?;
        let (width, height) = source.intrinsic_size();
        log::info!("Video source ready with {}x{}", width, height);

        let model = load_model(model).await?;
        Ok::<_, SessionError>((source, model))
    };

    // Waiting for the camera or a model download must not hold up shutdown
    let (source, model) = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            log::info!("Session cancelled during setup");
            return Ok(SessionState::start(Instant::now()));
        }
        res = setup => res?,
    };
    channels.set_status(SessionStatus::Running);

    let session = run_detection_loop(
        Arc::new(source),
        Arc::new(model),
        presenter,
        SessionState::start(Instant::now()),
        &detection_loop,
        cancel,
    )
    .await?;

    Ok(session)
}
