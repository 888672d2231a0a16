//! Overlay projector.
//!
//! Paints the detections of one frame onto a surface that is pixel aligned with the displayed
//! video. Detections come in intrinsic video pixels and are mapped with the letterbox/pillarbox
//! corrected [`Transform`] of the current [`VideoGeometry`].
use common::{BBox, Detection, Transform, VideoGeometry};
use image::Rgba;

use crate::surface::{FontSpec, Surface};

/// Look of boxes and label chips.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayStyle {
    pub stroke_color: Rgba<u8>,
    pub line_width: f32,
    pub chip_color: Rgba<u8>,
    pub text_color: Rgba<u8>,
    pub font: FontSpec,
    /// Added to text width and height to size the label chip.
    pub chip_padding: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke_color: Rgba([0x00, 0xff, 0xff, 0xff]),
            line_width: 3.0,
            chip_color: Rgba([0x00, 0xff, 0xff, 0xff]),
            text_color: Rgba([0x00, 0x00, 0x00, 0xff]),
            font: FontSpec::default(),
            chip_padding: 4.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayConfig {
    /// Detections with a confidence at or below are not drawn.
    pub threshold: f32,
    pub style: OverlayStyle,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            style: OverlayStyle::default(),
        }
    }
}

/// Outcome of painting one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub transform: Transform,
    pub drawn: usize,
}

/// Paint `detections` onto `surface` for the given geometry.
///
/// The surface is resized to the display size and cleared first, so nothing carries over from
/// the previous frame. Returns `None` without touching the surface if the geometry has an empty
/// dimension, e.g. while the video element is hidden.
pub fn render_detections<S: Surface>(
    surface: &mut S,
    geometry: &VideoGeometry,
    detections: &[Detection],
    config: &OverlayConfig,
) -> Option<Projection> {
    let transform = Transform::fit(geometry)?;
    let style = &config.style;

    surface.resize(geometry.display_width, geometry.display_height);
    surface.clear();

    let mut drawn = 0;
    for detection in detections
        .iter()
        .filter(|detection| detection.confidence > config.threshold)
    {
        let bbox = transform.apply(&detection.bbox);
        surface.stroke_rect(&bbox, style.stroke_color, style.line_width);

        let text = detection.label();
        let text_width = surface.measure_text(&text, &style.font);
        let chip = BBox::new(
            bbox.x,
            bbox.y,
            text_width + style.chip_padding,
            style.font.size_px + style.chip_padding,
        );
        surface.fill_rect(&chip, style.chip_color);
        surface.fill_text(&text, bbox.x, bbox.y, &style.font, style.text_color);

        drawn += 1;
    }

    log::trace!("Drew {} of {} detections", drawn, detections.len());

    Some(Projection { transform, drawn })
}

#[cfg(test)]
pub(crate) mod test {

    use super::*;

    /// Drawing call as recorded by [`RecordingSurface`].
    #[derive(Clone, Debug, PartialEq)]
    pub enum Op {
        Resize(u32, u32),
        Clear,
        Stroke(BBox, Rgba<u8>, f32),
        Fill(BBox, Rgba<u8>),
        Text(String, f32, f32, Rgba<u8>),
    }

    /// Surface recording calls, text is 10 px per character wide.
    #[derive(Default)]
    pub struct RecordingSurface {
        pub ops: Vec<Op>,
        size: (u32, u32),
    }

    impl Surface for RecordingSurface {
        fn resize(&mut self, width: u32, height: u32) {
            self.size = (width, height);
            self.ops.push(Op::Resize(width, height));
        }

        fn size(&self) -> (u32, u32) {
            self.size
        }

        fn clear(&mut self) {
            self.ops.push(Op::Clear);
        }

        fn stroke_rect(&mut self, rect: &BBox, color: Rgba<u8>, line_width: f32) {
            self.ops.push(Op::Stroke(*rect, color, line_width));
        }

        fn fill_rect(&mut self, rect: &BBox, color: Rgba<u8>) {
            self.ops.push(Op::Fill(*rect, color));
        }

        fn fill_text(&mut self, text: &str, x: f32, y: f32, _font: &FontSpec, color: Rgba<u8>) {
            self.ops.push(Op::Text(text.to_owned(), x, y, color));
        }

        fn measure_text(&self, text: &str, _font: &FontSpec) -> f32 {
            10.0 * text.chars().count() as f32
        }
    }

    impl RecordingSurface {
        pub fn strokes(&self) -> Vec<BBox> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    Op::Stroke(bbox, _, _) => Some(*bbox),
                    _ => None,
                })
                .collect()
        }
    }

    fn person(confidence: f32, bbox: BBox) -> Detection {
        Detection::new("person", confidence, bbox)
    }

    #[test]
    fn letterboxed_box_is_scaled_and_shifted() {
        let mut surface = RecordingSurface::default();
        let geometry = VideoGeometry::new((1280, 720), (640, 480));
        let detections = [person(0.9, BBox::new(100.0, 200.0, 300.0, 400.0))];

        let projection =
            render_detections(&mut surface, &geometry, &detections, &OverlayConfig::default())
                .unwrap();
        assert_eq!(projection.drawn, 1);
        assert_eq!(projection.transform.offset_y, 60.0);

        let cyan = Rgba([0x00, 0xff, 0xff, 0xff]);
        let black = Rgba([0x00, 0x00, 0x00, 0xff]);
        // "person 90.0%" is 12 characters
        assert_eq!(
            surface.ops,
            vec![
                Op::Resize(640, 480),
                Op::Clear,
                Op::Stroke(BBox::new(50.0, 160.0, 150.0, 200.0), cyan, 3.0),
                Op::Fill(BBox::new(50.0, 160.0, 124.0, 20.0), cyan),
                Op::Text("person 90.0%".to_owned(), 50.0, 160.0, black),
            ]
        );
    }

    #[test]
    fn equal_aspect_keeps_box() {
        let mut surface = RecordingSurface::default();
        let geometry = VideoGeometry::new((640, 480), (640, 480));
        let bbox = BBox::new(100.0, 100.0, 50.0, 50.0);

        render_detections(
            &mut surface,
            &geometry,
            &[person(0.5, bbox)],
            &OverlayConfig::default(),
        )
        .unwrap();
        assert_eq!(surface.strokes(), vec![bbox]);
    }

    #[test]
    fn threshold_is_strict() {
        let mut surface = RecordingSurface::default();
        let geometry = VideoGeometry::new((640, 480), (640, 480));
        let detections = [
            person(0.3, BBox::new(0.0, 0.0, 10.0, 10.0)),
            person(0.30001, BBox::new(20.0, 0.0, 10.0, 10.0)),
            person(0.1, BBox::new(40.0, 0.0, 10.0, 10.0)),
        ];

        let projection =
            render_detections(&mut surface, &geometry, &detections, &OverlayConfig::default())
                .unwrap();
        assert_eq!(projection.drawn, 1);
        assert_eq!(surface.strokes(), vec![BBox::new(20.0, 0.0, 10.0, 10.0)]);
    }

    #[test]
    fn zero_display_is_a_no_op() {
        let mut surface = RecordingSurface::default();
        let detections = [person(0.9, BBox::new(0.0, 0.0, 10.0, 10.0))];

        let geometry = VideoGeometry::new((1280, 720), (640, 0));
        assert!(
            render_detections(&mut surface, &geometry, &detections, &OverlayConfig::default())
                .is_none()
        );
        let geometry = VideoGeometry::new((1280, 720), (0, 480));
        assert!(
            render_detections(&mut surface, &geometry, &detections, &OverlayConfig::default())
                .is_none()
        );
        assert!(surface.ops.is_empty());
    }

    #[test]
    fn empty_frame_still_clears() {
        let mut surface = RecordingSurface::default();
        let geometry = VideoGeometry::new((640, 480), (320, 240));
        render_detections(&mut surface, &geometry, &[], &OverlayConfig::default()).unwrap();
        assert_eq!(surface.ops, vec![Op::Resize(320, 240), Op::Clear]);
    }

    #[test]
    fn keeps_model_order() {
        let mut surface = RecordingSurface::default();
        let geometry = VideoGeometry::new((640, 480), (640, 480));
        let detections = [
            person(0.4, BBox::new(1.0, 1.0, 10.0, 10.0)),
            person(0.9, BBox::new(2.0, 2.0, 10.0, 10.0)),
            person(0.6, BBox::new(3.0, 3.0, 10.0, 10.0)),
        ];

        render_detections(&mut surface, &geometry, &detections, &OverlayConfig::default())
            .unwrap();
        let xs: Vec<f32> = surface.strokes().iter().map(|bbox| bbox.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn style_and_threshold_are_configurable() {
        let mut surface = RecordingSurface::default();
        let geometry = VideoGeometry::new((640, 480), (640, 480));
        let red = Rgba([0xff, 0x00, 0x00, 0xff]);
        let config = OverlayConfig {
            threshold: 0.8,
            style: OverlayStyle {
                stroke_color: red,
                line_width: 1.0,
                ..Default::default()
            },
        };
        let detections = [
            person(0.7, BBox::new(0.0, 0.0, 10.0, 10.0)),
            person(0.85, BBox::new(5.0, 5.0, 10.0, 10.0)),
        ];

        render_detections(&mut surface, &geometry, &detections, &config).unwrap();
        assert!(surface
            .ops
            .contains(&Op::Stroke(BBox::new(5.0, 5.0, 10.0, 10.0), red, 1.0)));
        assert_eq!(surface.strokes().len(), 1);
    }
}
