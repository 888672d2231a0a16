//! Presentation of processed frames.
//!
//! The presenter is downstream of the projector: it fits the camera frame into the display box
//! with the same transform the overlay was drawn with, blends the overlay on top and publishes
//! the result as a JPEG item of a multipart stream.
use std::sync::Arc;

use bytes::Bytes;
use common::{timing::format_fps, Detection, Transform, VideoGeometry};
use image::{imageops::FilterType, DynamicImage, Rgba, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::{
    error::DetectionError,
    meter::{FrameStage, METER},
    overlay::{render_detections, OverlayConfig},
    surface::{ImageSurface, Surface},
};

/// Frames buffered per viewer before it starts to skip.
const FRAME_CHANNEL_CAPACITY: usize = 4;

/// Size of the video box on the page.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplaySize {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Lifecycle of the detection session as shown on the page.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum SessionStatus {
    #[default]
    Starting,
    Running,
    Failed(String),
    Stopped,
}

/// Statistics of the latest presented frame.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FrameStats {
    pub status: SessionStatus,
    pub fps: Option<f64>,
    /// FPS as shown in the readout.
    pub fps_text: String,
    pub frames: u64,
    pub detections: usize,
    pub intrinsic: Option<(u32, u32)>,
    pub display: DisplaySize,
}

/// Channels between the detection loop and the page host.
pub struct SessionChannels {
    frames_tx: broadcast::Sender<Bytes>,
    display_tx: watch::Sender<DisplaySize>,
    stats_tx: watch::Sender<FrameStats>,
}

impl SessionChannels {
    pub fn new(display: DisplaySize) -> Self {
        let (frames_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let (display_tx, _) = watch::channel(display);
        let (stats_tx, _) = watch::channel(FrameStats {
            fps_text: format_fps(None),
            display,
            ..Default::default()
        });

        Self {
            frames_tx,
            display_tx,
            stats_tx,
        }
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<Bytes> {
        self.frames_tx.subscribe()
    }

    pub fn display(&self) -> DisplaySize {
        *self.display_tx.borrow()
    }

    pub fn set_display(&self, display: DisplaySize) {
        let previous = self.display_tx.send_replace(display);
        if previous != display {
            log::info!(
                "Display size changed from {}x{} to {}x{}",
                previous.width,
                previous.height,
                display.width,
                display.height
            );
        }
    }

    pub fn stats(&self) -> FrameStats {
        self.stats_tx.borrow().clone()
    }

    pub fn set_status(&self, status: SessionStatus) {
        self.stats_tx.send_modify(|stats| stats.status = status);
    }

    fn publish_frame(&self, jpeg: &[u8]) {
        // No viewers is not an error
        self.frames_tx.send(as_jpeg_stream_item(jpeg)).ok();
    }

    fn update_stats(&self, modify: impl FnOnce(&mut FrameStats)) {
        self.stats_tx.send_modify(modify);
    }
}

/// Receives every processed frame of the detection loop.
pub trait Present: Send {
    /// Present one frame. Returns `false` if the frame was skipped, e.g. for an empty display.
    fn present(
        &mut self,
        frame: RgbImage,
        detections: &[Detection],
        fps: Option<f64>,
    ) -> Result<bool, DetectionError>;
}

/// Draws the overlay and publishes the composed frame.
pub struct OverlayPresenter {
    surface: ImageSurface,
    config: OverlayConfig,
    channels: Arc<SessionChannels>,
    jpeg_quality: i32,
}

impl OverlayPresenter {
    pub fn new(
        surface: ImageSurface,
        config: OverlayConfig,
        channels: Arc<SessionChannels>,
        jpeg_quality: i32,
    ) -> Self {
        Self {
            surface,
            config,
            channels,
            jpeg_quality,
        }
    }
}

impl Present for OverlayPresenter {
    fn present(
        &mut self,
        frame: RgbImage,
        detections: &[Detection],
        fps: Option<f64>,
    ) -> Result<bool, DetectionError> {
        // Re-read every frame, the page may have been resized
        let display = self.channels.display();
        let geometry = VideoGeometry::new(frame.dimensions(), (display.width, display.height));

        let projection =
            match render_detections(&mut self.surface, &geometry, detections, &self.config) {
                Some(projection) => projection,
                None => {
                    log::debug!("Skipping frame for empty geometry {:?}", geometry);
                    return Ok(false);
                }
            };

        let composed = compose(
            &frame,
            &geometry,
            &projection.transform,
            self.surface.canvas(),
        );
        let jpeg = turbojpeg::compress_image(&composed, self.jpeg_quality, turbojpeg::Subsamp::Sub2x2)
            .map_err(|err| DetectionError::Present(err.to_string()))?;

        self.channels.publish_frame(&jpeg);
        METER.count(FrameStage::Rendered);

        self.channels.update_stats(|stats| {
            stats.fps = fps;
            stats.fps_text = format_fps(fps);
            stats.frames += 1;
            stats.detections = projection.drawn;
            stats.intrinsic = Some(frame.dimensions());
            stats.display = display;
        });

        Ok(true)
    }
}

/// Fit `frame` into the display box and blend `overlay` on top.
///
/// Areas of the box not covered by the video stay black, like the bars of a letterboxed video
/// element.
pub fn compose(
    frame: &RgbImage,
    geometry: &VideoGeometry,
    transform: &Transform,
    overlay: &RgbaImage,
) -> RgbImage {
    let mut composed = RgbaImage::from_pixel(
        geometry.display_width,
        geometry.display_height,
        Rgba([0, 0, 0, 255]),
    );

    let video_rect = transform.video_rect(geometry);
    let (width, height) = (
        (video_rect.width.round() as u32).max(1),
        (video_rect.height.round() as u32).max(1),
    );
    let video = if frame.dimensions() == (width, height) {
        DynamicImage::ImageRgb8(frame.clone())
    } else {
        DynamicImage::ImageRgb8(image::imageops::resize(
            frame,
            width,
            height,
            FilterType::Triangle,
        ))
    };

    image::imageops::overlay(
        &mut composed,
        &video.to_rgba8(),
        video_rect.x.round() as i64,
        video_rect.y.round() as i64,
    );
    image::imageops::overlay(&mut composed, overlay, 0, 0);

    DynamicImage::ImageRgba8(composed).to_rgb8()
}

/// Wrap a JPEG as part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}
