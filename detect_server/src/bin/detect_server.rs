//! Object detection server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use cam_capture::CameraConfig;
use clap::Parser;
use detect_server::{
    driver::{run_session, LoopConfig, SessionConfig},
    endpoints::{healthcheck, index, set_display, stats, video_stream, PageInfo},
    meter::spawn_meter_logger,
    nn::{default_model_dir, ModelOptions, ModelVariant},
    overlay::{OverlayConfig, OverlayStyle},
    presenter::{DisplaySize, OverlayPresenter, SessionChannels},
    surface::{ImageSurface, DEFAULT_FONT_PATH},
};
use env_logger::TimestampPrecision;
use tokio_util::sync::CancellationToken;

/// Time the camera gets to deliver its first frame.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the page on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Camera device
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Capture resolution as WxH, maximum supported if unset
    #[clap(long, value_parser = parse_size)]
    resolution: Option<(u32, u32)>,

    /// Capture frame rate, maximum supported if unset
    #[clap(long)]
    frame_rate: Option<u32>,

    /// One of lite_mobilenet_v2, mobilenet_v1 or mobilenet_v2
    #[clap(long, default_value_t = ModelVariant::default())]
    model_variant: ModelVariant,

    /// Directory holding the model files
    #[clap(long)]
    model_dir: Option<PathBuf>,

    /// Base URL to download missing model files from
    #[clap(long)]
    model_base_url: Option<String>,

    /// Minimum score of a detection reported by the model
    #[clap(long, default_value_t = 0.5)]
    min_score: f32,

    /// Maximum number of detections per frame
    #[clap(long, default_value_t = 20)]
    max_detections: usize,

    /// Detections at or below this confidence are not drawn
    #[clap(long, default_value_t = 0.3)]
    threshold: f32,

    /// TrueType font for the labels
    #[clap(long, default_value = DEFAULT_FONT_PATH)]
    font_path: PathBuf,

    /// Initial display size as WxH, updated by the page
    #[clap(long, value_parser = parse_size, default_value = "640x480")]
    display: (u32, u32),

    /// Refresh rate the detection loop is bound to
    #[clap(long, default_value_t = 60)]
    refresh_hz: u32,

    /// Failed frames in a row after which the session stops
    #[clap(long, default_value_t = 30)]
    max_consecutive_failures: u32,

    /// Quality of the streamed JPEGs
    #[clap(long, default_value_t = 80)]
    jpeg_quality: i32,
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {s}"))?;
    let width = width.trim().parse().map_err(|err| format!("width: {err}"))?;
    let height = height.trim().parse().map_err(|err| format!("height: {err}"))?;
    Ok((width, height))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let surface = ImageSurface::with_font_file(&args.font_path)?;
    let cancel = CancellationToken::new();
    let channels = Arc::new(SessionChannels::new(DisplaySize {
        width: args.display.0,
        height: args.display.1,
    }));

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", err);
            }
            log::info!("Shutting down");
            cancel.cancel();
        });
    }

    spawn_meter_logger(cancel.clone());

    let config = SessionConfig {
        camera: CameraConfig {
            device: args.device,
            resolution: args.resolution,
            frame_rate: args.frame_rate.map(|fps| (1, fps)),
            ..Default::default()
        },
        ready_timeout: READY_TIMEOUT,
        model: ModelOptions {
            variant: args.model_variant,
            model_dir: args.model_dir.unwrap_or_else(default_model_dir),
            base_url: args.model_base_url,
            min_score: args.min_score,
            max_detections: args.max_detections,
            ..Default::default()
        },
        detection_loop: LoopConfig {
            refresh_hz: args.refresh_hz,
            max_consecutive_failures: args.max_consecutive_failures,
        },
    };
    let overlay = OverlayConfig {
        threshold: args.threshold,
        style: OverlayStyle::default(),
    };

    let session = {
        let channels = channels.clone();
        let cancel = cancel.clone();
        let mut presenter =
            OverlayPresenter::new(surface, overlay, channels.clone(), args.jpeg_quality);
        // The outcome is logged and shown on the page, the server keeps running
        tokio::spawn(async move { run_session(config, &mut presenter, &channels, &cancel).await })
    };

    // Build HTTP server with endpoints
    let app = Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/stream", get(video_stream))
        .route("/stats", get(stats))
        .route("/display", post(set_display))
        .layer(Extension(channels))
        .layer(Extension(Arc::new(PageInfo::default())))
        .layer(Extension(cancel.clone()));

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{}", addr);
    let shutdown = cancel.clone();
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    // Ends right away if the session stopped on its own
    cancel.cancel();
    let _ = session.await?;

    Ok(())
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn sizes_are_parsed() {
        assert_eq!(parse_size("640x480"), Ok((640, 480)));
        assert_eq!(parse_size("1280X720"), Ok((1280, 720)));
        assert!(parse_size("640").is_err());
        assert!(parse_size("ax480").is_err());
    }

    #[test]
    fn args_have_defaults() {
        let args = Args::parse_from(["detect_server"]);
        assert_eq!(args.display, (640, 480));
        assert_eq!(args.threshold, 0.3);
        assert_eq!(args.model_variant, ModelVariant::LiteMobilenetV2);
        assert!(args.resolution.is_none());
    }
}
