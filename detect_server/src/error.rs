//! Error taxonomy of a detection session.
//!
//! Setup errors ([`MediaAccessError`], [`ModelLoadError`]) end the session before the detection
//! loop starts. [`DetectionError`] covers a single frame; the loop decides whether it is fatal.
use std::path::PathBuf;

use thiserror::Error;

pub use cam_capture::MediaAccessError;

/// The detection model could not be loaded.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model file {0} not found and no download URL configured")]
    NotFound(PathBuf),

    #[error("failed to download model from {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("model file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to initialize model: {0}")]
    Init(String),
}

/// A single frame could not be processed.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("failed to capture frame: {0}")]
    Capture(String),

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("failed to present frame: {0}")]
    Present(String),

    #[error("giving up after {0} consecutive failed frames")]
    TooManyFailures(u32),

    #[error("detection task failed: {0}")]
    TaskFailed(String),
}

/// Everything that can end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Media(#[from] MediaAccessError),

    #[error(transparent)]
    Model(#[from] ModelLoadError),

    #[error(transparent)]
    Detection(#[from] DetectionError),
}
