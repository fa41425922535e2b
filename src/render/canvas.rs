// src/render/canvas.rs
//
// Raster primitives used by the compositor and trajectory exporter.
//
// Thin wrapper over `imageproc` drawing that:
//   - accepts f64 pixel coordinates and clips silently (overlays routinely
//     extend past the frame when the grid is rotated),
//   - supports line thickness, which imageproc line drawing lacks,
//   - never panics on degenerate shapes (zero-size rects, collapsed polygons)
//     or on coordinates far outside the canvas.

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut, draw_polygon_mut,
    draw_text_mut, text_size,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use std::path::Path;
use tracing::info;

/// DejaVu Sans, compiled in so labels render without any font on disk.
static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Coordinates are clamped to this margin around the canvas before any
/// integer conversion; everything beyond it is off-canvas anyway.
const CLIP_MARGIN: f64 = 4096.0;

/// The bundled label font.
pub fn default_font() -> Result<FontArc> {
    FontArc::try_from_slice(DEFAULT_FONT).map_err(|e| anyhow::anyhow!("Invalid bundled font: {}", e))
}

/// The font at `path` when given, else the bundled one.
pub fn resolve_font(path: Option<&Path>) -> Result<FontArc> {
    match path {
        Some(path) => load_font(path),
        None => default_font(),
    }
}

/// Load a TrueType/OpenType font for labels.
pub fn load_font(path: &Path) -> Result<FontArc> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read font {}", path.display()))?;
    let font = FontArc::try_from_vec(bytes)
        .map_err(|e| anyhow::anyhow!("Invalid font {}: {}", path.display(), e))?;
    info!("✓ Label font loaded from {}", path.display());
    Ok(font)
}

pub struct Canvas<'f> {
    image: RgbImage,
    font: Option<&'f FontArc>,
}

impl<'f> Canvas<'f> {
    /// Blank canvas filled with `background`.
    pub fn new(width: u32, height: u32, background: Rgb<u8>, font: Option<&'f FontArc>) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, background),
            font,
        }
    }

    pub fn from_image(image: RgbImage, font: Option<&'f FontArc>) -> Self {
        Self { image, font }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    fn clip_x(&self, x: f64) -> f64 {
        clip(x, self.width())
    }

    fn clip_y(&self, y: f64) -> f64 {
        clip(y, self.height())
    }

    fn clip_point(&self, (x, y): (f64, f64)) -> (f64, f64) {
        (self.clip_x(x), self.clip_y(y))
    }

    /// Copy `src` unscaled with its top-left corner at (x, y).
    pub fn paste(&mut self, src: &RgbImage, x: u32, y: u32) {
        image::imageops::replace(&mut self.image, src, x as i64, y as i64);
    }

    /// Line of the given thickness; thickness 1 is a plain segment.
    pub fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Rgb<u8>, thickness: u32) {
        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let len = (dx * dx + dy * dy).sqrt();

        if thickness <= 1 || len < f64::EPSILON {
            let (a, b) = (self.clip_point(from), self.clip_point(to));
            draw_line_segment_mut(&mut self.image, (a.0 as f32, a.1 as f32), (b.0 as f32, b.1 as f32), color);
            if thickness > 1 {
                self.dot(from, thickness as f64 / 2.0, color);
            }
            return;
        }

        let half = thickness as f64 / 2.0;
        let (nx, ny) = (-dy / len * half, dx / len * half);
        let quad = [
            (from.0 + nx, from.1 + ny),
            (to.0 + nx, to.1 + ny),
            (to.0 - nx, to.1 - ny),
            (from.0 - nx, from.1 - ny),
        ];
        self.fill_polygon(&quad, color);
    }

    pub fn polyline(&mut self, points: &[(f64, f64)], color: Rgb<u8>, thickness: u32) {
        for pair in points.windows(2) {
            self.line(pair[0], pair[1], color, thickness);
        }
    }

    /// Filled axis-aligned rectangle from corner (x1, y1) to (x2, y2).
    pub fn fill_rect(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, color: Rgb<u8>) {
        let (x1, x2) = (self.clip_x(x1), self.clip_x(x2));
        let (y1, y2) = (self.clip_y(y1), self.clip_y(y2));
        let (left, right) = (x1.min(x2).round() as i32, x1.max(x2).round() as i32);
        let (top, bottom) = (y1.min(y2).round() as i32, y1.max(y2).round() as i32);
        let (w, h) = ((right - left).max(1) as u32, (bottom - top).max(1) as u32);
        draw_filled_rect_mut(&mut self.image, Rect::at(left, top).of_size(w, h), color);
    }

    /// Rectangle outline growing inward by `thickness` pixels.
    pub fn rect_outline(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, color: Rgb<u8>, thickness: u32) {
        let (left, right) = (x1.min(x2), x1.max(x2));
        let (top, bottom) = (y1.min(y2), y1.max(y2));
        let t = thickness.max(1) as f64;

        self.fill_rect(left, top, right, (top + t).min(bottom), color);
        self.fill_rect(left, (bottom - t).max(top), right, bottom, color);
        self.fill_rect(left, top, (left + t).min(right), bottom, color);
        self.fill_rect((right - t).max(left), top, right, bottom, color);
    }

    pub fn dot(&mut self, center: (f64, f64), radius: f64, color: Rgb<u8>) {
        let (x, y) = self.clip_point(center);
        let r = radius.clamp(1.0, (self.width().max(self.height()) as f64).max(1.0)).round() as i32;
        draw_filled_circle_mut(
            &mut self.image,
            (x.round() as i32, y.round() as i32),
            r,
            color,
        );
    }

    /// Filled polygon. Collapsed outlines degrade to line segments.
    pub fn fill_polygon(&mut self, points: &[(f64, f64)], color: Rgb<u8>) {
        let mut poly: Vec<Point<i32>> = Vec::with_capacity(points.len());
        for &point in points {
            let (x, y) = self.clip_point(point);
            let p = Point::new(x.round() as i32, y.round() as i32);
            if poly.last() != Some(&p) {
                poly.push(p);
            }
        }
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }

        if poly.len() >= 3 {
            draw_polygon_mut(&mut self.image, &poly, color);
        } else if poly.len() == 2 {
            draw_line_segment_mut(
                &mut self.image,
                (poly[0].x as f32, poly[0].y as f32),
                (poly[1].x as f32, poly[1].y as f32),
                color,
            );
        } else if let Some(p) = poly.first() {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < self.width() && (p.y as u32) < self.height() {
                self.image.put_pixel(p.x as u32, p.y as u32, color);
            }
        }
    }

    /// Filled polygon blended over the current content:
    /// `alpha * color + (1 - alpha) * background`.
    pub fn blend_polygon(&mut self, points: &[(f64, f64)], color: Rgb<u8>, alpha: f32) {
        if points.is_empty() {
            return;
        }
        let (w, h) = (self.width() as i64, self.height() as i64);
        let min_x = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min).floor() as i64;
        let max_x = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max).ceil() as i64;
        let min_y = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min).floor() as i64;
        let max_y = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max).ceil() as i64;

        let (x0, x1) = (min_x.clamp(0, w), max_x.saturating_add(1).clamp(0, w));
        let (y0, y1) = (min_y.clamp(0, h), max_y.saturating_add(1).clamp(0, h));
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        // Rasterize the shape into a mask covering just its bounding box
        let (mw, mh) = ((x1 - x0) as u32, (y1 - y0) as u32);
        let mut mask = Canvas::new(mw, mh, Rgb([0, 0, 0]), None);
        let local: Vec<(f64, f64)> = points
            .iter()
            .map(|&(x, y)| (x - x0 as f64, y - y0 as f64))
            .collect();
        mask.fill_polygon(&local, Rgb([255, 255, 255]));

        for (mx, my, m) in mask.image.enumerate_pixels() {
            if m.0[0] == 0 {
                continue;
            }
            let px = self.image.get_pixel_mut(mx + x0 as u32, my + y0 as u32);
            for c in 0..3 {
                let blended = alpha * color.0[c] as f32 + (1.0 - alpha) * px.0[c] as f32;
                px.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    /// Pixel size of `text`; estimated when no font is loaded so layout
    /// (label plates) stays the same either way.
    pub fn text_size(&self, text: &str, scale: f32) -> (u32, u32) {
        match self.font {
            Some(font) => text_size(PxScale::from(scale), font, text),
            None => (
                (text.chars().count() as f32 * scale * 0.55).ceil() as u32,
                (scale * 0.75).ceil() as u32,
            ),
        }
    }

    /// Text with its top-left corner at (x, y). No-op without a font.
    pub fn text(&mut self, text: &str, x: f64, y: f64, scale: f32, color: Rgb<u8>) {
        if let Some(font) = self.font {
            let (x, y) = self.clip_point((x, y));
            draw_text_mut(
                &mut self.image,
                color,
                x.round() as i32,
                y.round() as i32,
                PxScale::from(scale),
                font,
                text,
            );
        }
    }

}

/// Clamp one coordinate to `[-CLIP_MARGIN, extent + CLIP_MARGIN]`; NaN maps
/// to the low edge.
fn clip(v: f64, extent: u32) -> f64 {
    let high = extent as f64 + CLIP_MARGIN;
    if v.is_nan() {
        -CLIP_MARGIN
    } else {
        v.clamp(-CLIP_MARGIN, high)
    }
}
