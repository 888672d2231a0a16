//! Sensors module.
//!
//! Opens the user-facing webcam, starts an MJPG stream and waits for the first frame, which is
//! the point where the intrinsic dimensions of the stream become known.
use std::{io, sync::Mutex};

use rscam::{Camera, Config, Frame};
use thiserror::Error;

pub type CaptureFn = Box<dyn Fn() -> io::Result<Frame> + Send + Sync>;

/// Number of captures tried while waiting for a first usable frame.
const READY_ATTEMPTS: usize = 10;

/// Camera could not be acquired.
#[derive(Debug, Error)]
pub enum MediaAccessError {
    #[error("permission to access {0} denied")]
    PermissionDenied(String),

    #[error("no camera at {0}")]
    NoDevice(String),

    #[error("camera does not support {0}")]
    Unsupported(String),

    #[error("camera did not deliver a frame: {0}")]
    NotReady(String),

    #[error("camera error: {0}")]
    Device(#[from] io::Error),
}

impl MediaAccessError {
    fn from_open(device_name: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(device_name.to_owned()),
            io::ErrorKind::NotFound => Self::NoDevice(device_name.to_owned()),
            _ => Self::Device(err),
        }
    }
}

/// Camera settings. Unset resolution and frame rate pick the maximum the camera supports.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub device: String,
    pub format: String,
    pub resolution: Option<(u32, u32)>,
    pub frame_rate: Option<(u32, u32)>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            // On laptops the first device is the built-in, user-facing camera
            device: "/dev/video0".to_owned(),
            format: "MJPG".to_owned(),
            resolution: None,
            frame_rate: None,
        }
    }
}

/// Started camera stream with known intrinsic dimensions.
pub struct VideoSource {
    capture_fn: CaptureFn,
    device: String,
    width: u32,
    height: u32,
}

impl VideoSource {
    /// Wrap a capture function and block until it delivers a frame with known dimensions.
    pub fn wait_ready(capture_fn: CaptureFn, device: &str) -> Result<Self, MediaAccessError> {
        let mut last_err = None;

        for attempt in 0..READY_ATTEMPTS {
            match capture_fn() {
                Ok(frame) => match jpeg_dimensions(&frame[..]) {
                    Some((width, height)) => {
                        if (width, height) != frame.resolution {
                            log::debug!(
                                "Negotiated {:?} but frames are {width}x{height}",
                                frame.resolution
                            );
                        }
                        log::info!("Camera {device} ready with {width}x{height}");
                        return Ok(Self {
                            capture_fn,
                            device: device.to_owned(),
                            width,
                            height,
                        });
                    }
                    None => log::debug!("No JPEG header on attempt {attempt}, waiting for next"),
                },
                Err(err) => {
                    log::debug!("Capture attempt {attempt} failed: {err}");
                    last_err = Some(err);
                }
            }
        }

        Err(MediaAccessError::NotReady(match last_err {
            Some(err) => err.to_string(),
            None => format!("no decodable frame after {READY_ATTEMPTS} attempts"),
        }))
    }

    /// Capture the current frame.
    pub fn capture(&self) -> io::Result<Frame> {
        (*self.capture_fn)()
    }

    /// Native resolution of the stream.
    pub fn intrinsic_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

/// Open the configured camera and wait until it is streaming.
///
/// Blocks until the first frame arrives. Callers in async code should run this on a blocking
/// thread and bound it with a timeout.
pub fn acquire_video_source(config: &CameraConfig) -> Result<VideoSource, MediaAccessError> {
    let capture_fn = get_capture_fn_linux(
        &config.device,
        &config.format,
        config.resolution,
        config.frame_rate,
    )?;
    VideoSource::wait_ready(capture_fn, &config.device)
}

/// Get a capture function to a video device on a Linux machine.
pub fn get_capture_fn_linux(
    device_name: &str,
    format: &str,
    resolution: Option<(u32, u32)>,
    frame_rate: Option<(u32, u32)>,
) -> Result<CaptureFn, MediaAccessError> {
    let mut cam =
        Camera::new(device_name).map_err(|err| MediaAccessError::from_open(device_name, err))?;
    log_supported_formats(&cam, format);
    let format = format.as_bytes();

    log::info!("Using camera {}", device_name);

    let resolution = resolution
        .map(Ok)
        .unwrap_or_else(|| get_max_resolution(&cam, format))?;

    let frame_rate = frame_rate
        .map(Ok)
        .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

    log::info!(
        "Starting capture with {}x{} at {}/{} s per frame",
        resolution.0,
        resolution.1,
        frame_rate.0,
        frame_rate.1
    );

    cam.start(&Config {
        interval: frame_rate,
        resolution,
        format,
        ..Default::default()
    })
    .map_err(|err| match err {
        rscam::Error::Io(err) => MediaAccessError::Device(err),
        other => MediaAccessError::Unsupported(other.to_string()),
    })?;

    let cam = Mutex::new(cam);
    let callback = move || {
        cam.lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "camera lock poisoned"))?
            .capture()
    };
    Ok(Box::new(callback))
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), MediaAccessError> {
    let resolution_info = cam.resolutions(format).map_err(|err| unsupported(format, err))?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => max_resolution(&resolutions),
        rscam::ResolutionInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| MediaAccessError::Unsupported("any resolution".to_owned()))
}

/// Get the maximum supported frame rate for the given format and resolution.
///
/// Frame rates are given as intervals `(numerator, denominator)` in seconds per frame.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), MediaAccessError> {
    let interval_info = cam
        .intervals(format, resolution)
        .map_err(|err| unsupported(format, err))?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => shortest_interval(&intervals),
        rscam::IntervalInfo::Stepwise {
            min,
            max: _,
            step: _,
        } => Some(min),
    }
    .ok_or_else(|| MediaAccessError::Unsupported("any frame rate".to_owned()))
}

/// Highest resolution in terms of number of pixels.
fn max_resolution(resolutions: &[(u32, u32)]) -> Option<(u32, u32)> {
    resolutions
        .iter()
        .max_by_key(|(width, height)| u64::from(*width) * u64::from(*height))
        .copied()
}

/// Shortest interval between frames, i.e. the highest frame rate.
fn shortest_interval(intervals: &[(u32, u32)]) -> Option<(u32, u32)> {
    intervals
        .iter()
        .filter(|(_, denominator)| *denominator > 0)
        // Microseconds per frame
        .min_by_key(|(numerator, denominator)| {
            u64::from(*numerator) * 1_000_000 / u64::from(*denominator)
        })
        .copied()
}

/// Width and height from the header of a JPEG frame, `None` for empty or broken frames.
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let header = turbojpeg::read_header(data).ok()?;
    let width = u32::try_from(header.width).ok()?;
    let height = u32::try_from(header.height).ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

fn unsupported(format: &[u8], err: rscam::Error) -> MediaAccessError {
    log::debug!("Format query failed: {err}");
    MediaAccessError::Unsupported(format!("format {}", String::from_utf8_lossy(format)))
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
