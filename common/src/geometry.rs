//! Mapping from intrinsic video pixels to the displayed video box.
//!
//! The camera delivers frames at its native resolution while the page shows them in a box of a
//! possibly different aspect ratio. The video is fitted into that box without distortion, which
//! leaves bars either at the top and bottom (letterbox) or at the left and right (pillarbox).
//! A [`Transform`] maps a point of the intrinsic frame to the matching point in the box.
use serde::{Deserialize, Serialize};

use crate::detection::BBox;

/// Intrinsic and displayed size of the video.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct VideoGeometry {
    pub intrinsic_width: u32,
    pub intrinsic_height: u32,
    pub display_width: u32,
    pub display_height: u32,
}

impl VideoGeometry {
    pub fn new(intrinsic: (u32, u32), display: (u32, u32)) -> Self {
        Self {
            intrinsic_width: intrinsic.0,
            intrinsic_height: intrinsic.1,
            display_width: display.0,
            display_height: display.1,
        }
    }

    /// Both sizes are non-empty, a transform can be computed.
    pub fn is_renderable(&self) -> bool {
        self.intrinsic_width > 0
            && self.intrinsic_height > 0
            && self.display_width > 0
            && self.display_height > 0
    }

    /// The video is relatively wider than its box, bars go on top and bottom.
    ///
    /// `iw / ih > dw / dh`, compared as integer cross products so equal aspects are exact.
    pub fn is_letterbox(&self) -> bool {
        let (iw, ih, dw, dh) = self.dimensions_u64();
        iw * dh > ih * dw
    }

    fn dimensions_u64(&self) -> (u64, u64, u64, u64) {
        (
            u64::from(self.intrinsic_width),
            u64::from(self.intrinsic_height),
            u64::from(self.display_width),
            u64::from(self.display_height),
        )
    }
}

/// Uniform scale plus offset, valid for exactly one [`VideoGeometry`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Transform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Transform {
    /// Compute the letterbox/pillarbox corrected transform.
    ///
    /// Returns `None` if any dimension is zero, e.g. when the video element is hidden.
    pub fn fit(geometry: &VideoGeometry) -> Option<Self> {
        if !geometry.is_renderable() {
            return None;
        }

        let (iw, ih, dw, dh) = geometry.dimensions_u64();

        // Bars are half the unused length, (dh - ih * dw / iw) / 2 with the division done last.
        // The numerators are exact and never negative, equal aspects give zero offsets.
        let transform = if geometry.is_letterbox() {
            let scale = (dw as f64 / iw as f64) as f32;
            Self {
                scale_x: scale,
                scale_y: scale,
                offset_x: 0.0,
                offset_y: ((dh * iw - ih * dw) as f64 / (2 * iw) as f64) as f32,
            }
        } else {
            let scale = (dh as f64 / ih as f64) as f32;
            Self {
                scale_x: scale,
                scale_y: scale,
                offset_x: ((dw * ih - iw * dh) as f64 / (2 * ih) as f64) as f32,
                offset_y: 0.0,
            }
        };

        Some(transform)
    }

    /// Map a box from intrinsic to display coordinates.
    pub fn apply(&self, bbox: &BBox) -> BBox {
        BBox {
            x: bbox.x * self.scale_x + self.offset_x,
            y: bbox.y * self.scale_y + self.offset_y,
            width: bbox.width * self.scale_x,
            height: bbox.height * self.scale_y,
        }
    }

    /// Map a box from display back to intrinsic coordinates.
    pub fn invert(&self, bbox: &BBox) -> BBox {
        BBox {
            x: (bbox.x - self.offset_x) / self.scale_x,
            y: (bbox.y - self.offset_y) / self.scale_y,
            width: bbox.width / self.scale_x,
            height: bbox.height / self.scale_y,
        }
    }

    /// Rectangle the whole intrinsic frame occupies in the display box.
    pub fn video_rect(&self, geometry: &VideoGeometry) -> BBox {
        self.apply(&BBox::new(
            0.0,
            0.0,
            geometry.intrinsic_width as f32,
            geometry.intrinsic_height as f32,
        ))
    }
}

#[cfg(test)]
mod test {

    use super::*;

    const EPS: f32 = 1.0e-3;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < EPS
    }

    #[test]
    fn letterbox_720p_in_vga_box() {
        let geometry = VideoGeometry::new((1280, 720), (640, 480));
        assert!(geometry.is_letterbox());

        let t = Transform::fit(&geometry).unwrap();
        assert_eq!(t.scale_x, 0.5);
        assert_eq!(t.scale_y, 0.5);
        assert_eq!(t.offset_x, 0.0);
        assert_eq!(t.offset_y, 60.0);
    }

    #[test]
    fn pillarbox_vga_in_wide_box() {
        let geometry = VideoGeometry::new((640, 480), (1280, 720));
        assert!(!geometry.is_letterbox());

        let t = Transform::fit(&geometry).unwrap();
        assert_eq!(t.scale_x, 1.5);
        assert_eq!(t.scale_y, 1.5);
        assert_eq!(t.offset_y, 0.0);
        // (1280 - 640 * 1.5) / 2
        assert_eq!(t.offset_x, 160.0);
    }

    #[test]
    fn equal_aspect_is_identity() {
        let geometry = VideoGeometry::new((640, 480), (640, 480));
        let t = Transform::fit(&geometry).unwrap();
        assert_eq!(t.scale_x, 1.0);
        assert_eq!(t.scale_x, t.scale_y);
        assert_eq!(t.offset_x, 0.0);
        assert_eq!(t.offset_y, 0.0);

        let bbox = BBox::new(100.0, 100.0, 50.0, 50.0);
        assert_eq!(t.apply(&bbox), bbox);
    }

    #[test]
    fn equal_aspect_scaled_has_no_offsets() {
        let geometry = VideoGeometry::new((1920, 1080), (640, 360));
        let t = Transform::fit(&geometry).unwrap();
        assert_eq!(t.offset_x, 0.0);
        assert_eq!(t.offset_y, 0.0);
        assert_eq!(t.scale_x, t.scale_y);
    }

    #[test]
    fn offsets_follow_bar_placement() {
        let intrinsics = [(1280, 720), (640, 480), (480, 640), (1920, 1080), (333, 777)];
        let displays = [(640, 480), (1280, 720), (300, 900), (901, 301), (1, 1)];

        for intrinsic in intrinsics {
            for display in displays {
                let geometry = VideoGeometry::new(intrinsic, display);
                let t = Transform::fit(&geometry).unwrap();
                if geometry.is_letterbox() {
                    assert_eq!(t.offset_x, 0.0, "{geometry:?}");
                    assert!(t.offset_y >= 0.0, "{geometry:?}");
                } else {
                    assert_eq!(t.offset_y, 0.0, "{geometry:?}");
                    assert!(t.offset_x >= 0.0, "{geometry:?}");
                }
            }
        }
    }

    #[test]
    fn equal_aspects_never_offset() {
        // Every multiple of a reduced aspect ratio against every other multiple
        let aspects = [(4, 3), (16, 9), (2, 3), (3, 2), (1, 1), (21, 9), (9, 16), (5, 7)];
        let factors = [1, 2, 3, 7, 40, 100, 120, 240, 333, 360];

        for (aw, ah) in aspects {
            for fi in factors {
                for fd in factors {
                    let geometry = VideoGeometry::new((aw * fi, ah * fi), (aw * fd, ah * fd));
                    assert!(!geometry.is_letterbox(), "{geometry:?}");

                    let t = Transform::fit(&geometry).unwrap();
                    assert_eq!(t.offset_x, 0.0, "{geometry:?}");
                    assert_eq!(t.offset_y, 0.0, "{geometry:?}");
                    assert_eq!(t.scale_x, t.scale_y, "{geometry:?}");
                }
            }
        }

        // Failed with a float aspect comparison
        for (intrinsic, display) in [((720, 1080), (200, 300)), ((720, 480), (3, 2))] {
            let t = Transform::fit(&VideoGeometry::new(intrinsic, display)).unwrap();
            assert_eq!((t.offset_x, t.offset_y), (0.0, 0.0));
        }
    }

    #[test]
    fn offsets_are_never_negative() {
        for iw in (1..=64).step_by(3) {
            for ih in (1..=64).step_by(5) {
                for dw in (1..=300).step_by(37) {
                    for dh in (1..=300).step_by(41) {
                        let geometry = VideoGeometry::new((iw, ih), (dw, dh));
                        let t = Transform::fit(&geometry).unwrap();
                        assert!(t.offset_x >= 0.0 && t.offset_y >= 0.0, "{geometry:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn apply_then_invert_recovers_box() {
        let geometry = VideoGeometry::new((1280, 720), (640, 480));
        let t = Transform::fit(&geometry).unwrap();

        let bbox = BBox::new(311.7, 42.25, 123.4, 99.9);
        let back = t.invert(&t.apply(&bbox));
        assert!(close(back.x, bbox.x));
        assert!(close(back.y, bbox.y));
        assert!(close(back.width, bbox.width));
        assert!(close(back.height, bbox.height));
    }

    #[test]
    fn zero_display_has_no_transform() {
        assert!(Transform::fit(&VideoGeometry::new((1280, 720), (640, 0))).is_none());
        assert!(Transform::fit(&VideoGeometry::new((1280, 720), (0, 480))).is_none());
        assert!(Transform::fit(&VideoGeometry::new((0, 0), (640, 480))).is_none());
    }

    #[test]
    fn video_rect_covers_box_without_bars() {
        let geometry = VideoGeometry::new((1280, 720), (640, 480));
        let t = Transform::fit(&geometry).unwrap();
        assert_eq!(t.video_rect(&geometry), BBox::new(0.0, 60.0, 640.0, 360.0));
    }
}
