//! Camera acquisition for the detection server.
pub mod sensors;

pub use sensors::{acquire_video_source, CameraConfig, MediaAccessError, VideoSource};
