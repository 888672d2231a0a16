//! Detections as returned by the model.
//!
use serde::{Deserialize, Serialize};

use crate::decimal::fixed_1;

/// Axis-aligned box, `(x, y)` being the top-left corner.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from top-left and bottom-right corner points.
    pub fn from_corners(x_tl: f32, y_tl: f32, x_br: f32, y_br: f32) -> Self {
        Self::new(x_tl, y_tl, x_br - x_tl, y_br - y_tl)
    }

    /// Area of the box, zero for degenerate boxes.
    pub fn area(&self) -> f32 {
        if self.width < 0.0 || self.height < 0.0 {
            return 0.0;
        }

        self.width * self.height
    }
}

/// One observation of the model in intrinsic video pixel coordinates.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Detection {
    pub category: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(category: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            category: category.into(),
            confidence,
            bbox,
        }
    }

    /// Text shown on the label chip, e.g. `person 87.5%`.
    pub fn label(&self) -> String {
        let percent = f64::from(self.confidence) * 100.0;
        format!("{} {}%", self.category, fixed_1(percent))
    }
}
