use std::{sync::Arc, time::Instant};

use common::{BBox, Detection, Transform, VideoGeometry};
use detect_server::{
    driver::{run_detection_loop, FrameSource, LoopConfig, SessionState},
    error::{DetectionError, ModelLoadError},
    labels::coco_label,
    nn::{load_model, DetectModel, ModelOptions},
    overlay::{render_detections, OverlayConfig},
    presenter::{compose, DisplaySize, OverlayPresenter, SessionChannels},
    surface::{ImageSurface, DEFAULT_FONT_PATH},
};
use image::{Rgb, RgbImage};
use tokio_util::sync::CancellationToken;

const GRAY: Rgb<u8> = Rgb([128, 128, 128]);

/// Resizing may round a uniform color by one.
fn is_gray(pixel: &Rgb<u8>) -> bool {
    pixel.0.iter().all(|c| c.abs_diff(128) <= 1)
}

fn surface_or_skip() -> Option<ImageSurface> {
    match ImageSurface::with_font_file(DEFAULT_FONT_PATH) {
        Ok(surface) => Some(surface),
        Err(err) => {
            println!("Skipping, font not available: {err}");
            None
        }
    }
}

#[tokio::test]
async fn test_coco_ssd_on_synthetic_frame() -> Result<(), Box<dyn std::error::Error>> {
    let options = ModelOptions::default();
    let model = match load_model(options.clone()).await {
        Ok(model) => model,
        Err(ModelLoadError::NotFound(path)) => {
            println!("Skipping, no model at {}", path.display());
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let frame = RgbImage::from_fn(640, 480, |x, y| {
        if (200..440).contains(&x) && (120..360).contains(&y) {
            Rgb([200, 40, 40])
        } else {
            GRAY
        }
    });
    let detections = model.detect(&frame)?;
    dbg!(&detections);

    assert!(detections.len() <= options.max_detections);
    for detection in detections {
        assert!(detection.confidence >= options.min_score);
        assert!((1..=90).any(|id| coco_label(id) == Some(detection.category.as_str())));
        assert!(detection.bbox.x >= 0.0 && detection.bbox.y >= 0.0);
        assert!(detection.bbox.x + detection.bbox.width <= 640.5);
        assert!(detection.bbox.y + detection.bbox.height <= 480.5);
    }

    Ok(())
}

#[test]
fn test_overlay_lines_up_with_letterboxed_video() -> Result<(), Box<dyn std::error::Error>> {
    let mut surface = match surface_or_skip() {
        Some(surface) => surface,
        None => return Ok(()),
    };

    let frame = RgbImage::from_pixel(1280, 720, GRAY);
    let geometry = VideoGeometry::new(frame.dimensions(), (640, 480));
    let detections = [Detection::new(
        "person",
        0.9,
        BBox::new(100.0, 200.0, 300.0, 400.0),
    )];

    let projection = render_detections(
        &mut surface,
        &geometry,
        &detections,
        &OverlayConfig::default(),
    )
    .ok_or("geometry is not renderable")?;
    assert_eq!(projection.drawn, 1);
    assert_eq!(projection.transform, Transform::fit(&geometry).ok_or("no transform")?);

    let composed = compose(&frame, &geometry, &projection.transform, surface.canvas());
    assert_eq!(composed.dimensions(), (640, 480));

    // Bars above and below the video
    assert_eq!(*composed.get_pixel(5, 5), Rgb([0, 0, 0]));
    assert_eq!(*composed.get_pixel(5, 475), Rgb([0, 0, 0]));
    // Video without overlay
    assert!(is_gray(composed.get_pixel(600, 300)));
    // Left edge of the box, (100, 200, 300, 400) maps to (50, 160, 150, 200)
    assert_eq!(*composed.get_pixel(50, 260), Rgb([0, 255, 255]));
    assert!(is_gray(composed.get_pixel(100, 260)));

    Ok(())
}

struct StillCamera;

impl FrameSource for StillCamera {
    fn intrinsic_size(&self) -> (u32, u32) {
        (320, 240)
    }

    fn capture(&self) -> Result<RgbImage, DetectionError> {
        Ok(RgbImage::from_pixel(320, 240, GRAY))
    }
}

struct OnePerson;

impl DetectModel for OnePerson {
    fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        Ok(vec![Detection::new(
            "person",
            0.8,
            BBox::new(10.0, 10.0, 100.0, 100.0),
        )])
    }
}

#[tokio::test]
async fn test_detection_loop_streams_composed_frames() -> Result<(), Box<dyn std::error::Error>> {
    let surface = match surface_or_skip() {
        Some(surface) => surface,
        None => return Ok(()),
    };

    let channels = Arc::new(SessionChannels::new(DisplaySize {
        width: 640,
        height: 480,
    }));
    let mut frames_rx = channels.subscribe_frames();
    let mut presenter =
        OverlayPresenter::new(surface, OverlayConfig::default(), channels.clone(), 80);
    let cancel = CancellationToken::new();

    let viewer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut received = 0;
            while received < 3 {
                match frames_rx.recv().await {
                    Ok(item) => {
                        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg"));
                        received += 1;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(err) => panic!("frame channel closed: {err}"),
                }
            }
            cancel.cancel();
            received
        })
    };

    let session = run_detection_loop(
        Arc::new(StillCamera),
        Arc::new(OnePerson),
        &mut presenter,
        SessionState::start(Instant::now()),
        &LoopConfig {
            refresh_hz: 200,
            max_consecutive_failures: 3,
        },
        &cancel,
    )
    .await?;

    assert_eq!(viewer.await?, 3);
    assert!(session.frames >= 3);
    assert!(session.last_fps.is_some());

    let stats = channels.stats();
    assert_eq!(stats.detections, 1);
    assert_eq!(stats.intrinsic, Some((320, 240)));
    assert_ne!(stats.fps_text, "--");

    Ok(())
}
