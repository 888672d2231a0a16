//! 2D drawing surfaces for the overlay.
//!
//! The projector only talks to the [`Surface`] trait, so it can be exercised without pixels.
//! [`ImageSurface`] is the real thing: a transparent RGBA layer drawn with `imageproc`, which is
//! later blended over the video frame.
use std::path::Path;

use common::BBox;
use image::{Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{point, Font, Scale};

/// Default font, DejaVu Sans as shipped by most Linux distributions.
pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Font used for labels. The family is whatever font the surface was created with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FontSpec {
    pub size_px: f32,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self { size_px: 16.0 }
    }
}

/// Pixel addressed drawing surface. Coordinates start at the top-left corner.
pub trait Surface {
    /// Resize to `width` x `height`, content is undefined afterwards.
    fn resize(&mut self, width: u32, height: u32);

    fn size(&self) -> (u32, u32);

    /// Clear the whole surface.
    fn clear(&mut self);

    /// Stroke the outline of `rect`, centered on its edges.
    fn stroke_rect(&mut self, rect: &BBox, color: Rgba<u8>, line_width: f32);

    fn fill_rect(&mut self, rect: &BBox, color: Rgba<u8>);

    /// Draw `text` with its top edge at `y`.
    fn fill_text(&mut self, text: &str, x: f32, y: f32, font: &FontSpec, color: Rgba<u8>);

    /// Rendered width of `text`.
    fn measure_text(&self, text: &str, font: &FontSpec) -> f32;
}

/// Transparent RGBA layer.
pub struct ImageSurface {
    canvas: RgbaImage,
    font: Font<'static>,
}

impl ImageSurface {
    pub fn new(font: Font<'static>) -> Self {
        Self {
            canvas: RgbaImage::new(0, 0),
            font,
        }
    }

    /// Create a surface with a font loaded from a TTF file.
    pub fn with_font_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let font_data = std::fs::read(path)?;
        let font = Font::try_from_vec(font_data)
            .ok_or_else(|| anyhow::anyhow!("{} is not a valid font", path.display()))?;
        Ok(Self::new(font))
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }
}

impl Surface for ImageSurface {
    fn resize(&mut self, width: u32, height: u32) {
        if self.canvas.dimensions() != (width, height) {
            self.canvas = RgbaImage::new(width, height);
        }
    }

    fn size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = TRANSPARENT;
        }
    }

    fn stroke_rect(&mut self, rect: &BBox, color: Rgba<u8>, line_width: f32) {
        // One pixel wide outlines, grown outwards and shrunk inwards around the edge
        let line_width = line_width.round().max(1.0) as i32;
        let outset = (line_width - 1) / 2;
        for grow in (outset - line_width + 1)..=outset {
            let grown = BBox::new(
                rect.x - grow as f32,
                rect.y - grow as f32,
                rect.width + 2.0 * grow as f32,
                rect.height + 2.0 * grow as f32,
            );
            if let Some(outline) = to_rect(&grown) {
                draw_hollow_rect_mut(&mut self.canvas, outline, color);
            }
        }
    }

    fn fill_rect(&mut self, rect: &BBox, color: Rgba<u8>) {
        if let Some(rect) = to_rect(rect) {
            draw_filled_rect_mut(&mut self.canvas, rect, color);
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, font: &FontSpec, color: Rgba<u8>) {
        draw_text_mut(
            &mut self.canvas,
            color,
            x.round() as i32,
            y.round() as i32,
            Scale::uniform(font.size_px),
            &self.font,
            text,
        );
    }

    fn measure_text(&self, text: &str, font: &FontSpec) -> f32 {
        self.font
            .layout(text, Scale::uniform(font.size_px), point(0.0, 0.0))
            .last()
            .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
            .unwrap_or(0.0)
    }
}

/// Integer rectangle covering `bbox`, `None` if it is empty.
fn to_rect(bbox: &BBox) -> Option<Rect> {
    let (width, height) = (bbox.width.round(), bbox.height.round());
    if width < 1.0 || height < 1.0 {
        return None;
    }

    Some(Rect::at(bbox.x.round() as i32, bbox.y.round() as i32).of_size(width as u32, height as u32))
}
