//! Live object detection on your webcam stream, viewed in the browser.
//!
//! Frames are captured from the camera, run through a COCO-SSD model and composed with an
//! overlay of labeled bounding boxes that is aligned with the displayed video.
pub mod driver;
pub mod endpoints;
pub mod error;
pub mod labels;
pub mod meter;
pub mod nn;
pub mod overlay;
pub mod presenter;
pub mod surface;
pub mod utils;
