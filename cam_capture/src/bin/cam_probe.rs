//! Check that a camera can be acquired and measure its raw capture rate.
//!
use std::time::Instant;

use anyhow::Result;
use cam_capture::{acquire_video_source, CameraConfig};
use clap::Parser;
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Video device to open
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Number of frames to capture after the camera is ready
    #[clap(long, default_value = "30")]
    frames: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let config = CameraConfig {
        device: args.device,
        ..Default::default()
    };
    let source = acquire_video_source(&config)?;
    let (width, height) = source.intrinsic_size();
    log::info!("{} streams {}x{}", source.device(), width, height);

    let start = Instant::now();
    let mut bytes = 0;
    for _ in 0..args.frames {
        bytes += source.capture()?.len();
    }
    let elapsed = start.elapsed().as_secs_f32();

    if args.frames > 0 && elapsed > 0.0 {
        log::info!(
            "Captured {} frames in {:.2}s ({:.1} fps, {} bytes per frame)",
            args.frames,
            elapsed,
            args.frames as f32 / elapsed,
            bytes / args.frames as usize
        );
    }

    Ok(())
}
