//! Common code shared between `detect_server` and `cam_capture`.
//!
//! Everything in here is pure: no camera, no model and no drawing surface. This keeps the
//! coordinate mapping testable on its own.
pub mod decimal;
pub mod detection;
pub mod geometry;
pub mod timing;

pub use detection::{BBox, Detection};
pub use geometry::{Transform, VideoGeometry};
pub use timing::FrameTiming;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
