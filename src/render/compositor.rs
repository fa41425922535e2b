// src/render/compositor.rs
//
// One decoded frame + that frame's enriched detections → one annotated frame.
//
//   ┌──────────────────────────┬─────────────┐
//   │ source frame (unscaled)  │ legend      │
//   │ + grid, boxes, labels    │ (250 px)    │
//   ├──────────────────────────┴─────────────┤
//   │ timeline: one bar per tank             │
//   └────────────────────────────────────────┘
//
// With overlays disabled the canvas is exactly the source frame size.

use ab_glyph::FontArc;
use image::{Rgb, RgbImage};
use std::collections::BTreeSet;

use super::canvas::Canvas;
use crate::colors::{BehaviorColorMap, UNKNOWN_BEHAVIOR, UNKNOWN_SEGMENT};
use crate::grid::{CellAssigner, VideoSize};
use crate::types::{Detection, TimelineSegments};

// ============================================================================
// LAYOUT CONSTANTS
// ============================================================================

pub const LEGEND_WIDTH: u32 = 250;
const TIMELINE_ROW_HEIGHT: u32 = 15;
const TIMELINE_EXTRA_HEIGHT: u32 = 40;

const LEGEND_X_OFFSET: f64 = 20.0;
const LEGEND_Y_START: f64 = 20.0;
const LEGEND_BOX: f64 = 20.0;
const LEGEND_PITCH: f64 = 25.0;

const TIMELINE_PAD_X: f64 = 40.0;
const TIMELINE_PAD_Y: f64 = 20.0;
const TIMELINE_BAR_FILL: f64 = 0.8;
const TIMELINE_LABEL_OFFSET: f64 = 35.0;

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const GRID_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const PANEL_BACKGROUND: Rgb<u8> = Rgb([10, 10, 10]);
const BAR_COLOR: Rgb<u8> = Rgb([74, 74, 74]);
const INDICATOR_COLOR: Rgb<u8> = Rgb([255, 80, 80]);
const LEGEND_TEXT: Rgb<u8> = Rgb([240, 240, 240]);
const TANK_LABEL_TEXT: Rgb<u8> = Rgb([224, 224, 224]);
const PLATE_TEXT: Rgb<u8> = Rgb([0, 0, 0]);

const BOX_THICKNESS: u32 = 2;
const INDICATOR_THICKNESS: u32 = 2;
const POLYGON_ALPHA: f32 = 0.4;
const CENTROID_RADIUS: f64 = 3.0;

const LABEL_SCALE: f32 = 20.0;
const LEGEND_SCALE: f32 = 16.0;
const TANK_LABEL_SCALE: f32 = 12.0;

// ============================================================================
// LAYOUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasLayout {
    pub video: VideoSize,
    pub num_cells: u32,
    pub overlays: bool,
}

impl CanvasLayout {
    pub fn new(video: VideoSize, num_cells: u32, overlays: bool) -> Self {
        Self {
            video,
            num_cells,
            overlays,
        }
    }

    pub fn timeline_height(&self) -> u32 {
        if self.num_cells == 0 {
            0
        } else {
            self.num_cells * TIMELINE_ROW_HEIGHT + TIMELINE_EXTRA_HEIGHT
        }
    }

    /// Output frame size `(width, height)`.
    pub fn canvas_size(&self) -> (u32, u32) {
        if self.overlays {
            (
                self.video.width + LEGEND_WIDTH,
                self.video.height + self.timeline_height(),
            )
        } else {
            (self.video.width, self.video.height)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompositorOptions {
    pub draw_grid: bool,
    /// Legend and timeline panels
    pub draw_overlays: bool,
    pub line_thickness: u32,
    /// Tanks to draw; empty means all
    pub selected_cells: BTreeSet<u32>,
}

impl CompositorOptions {
    fn is_selected(&self, tank: u32) -> bool {
        self.selected_cells.is_empty() || self.selected_cells.contains(&tank)
    }
}

// ============================================================================
// COMPOSITOR
// ============================================================================

pub struct FrameCompositor<'a> {
    colors: &'a BehaviorColorMap,
    timeline: &'a TimelineSegments,
    options: CompositorOptions,
    font: &'a FontArc,
    layout: CanvasLayout,
    grid_lines: Vec<((f64, f64), (f64, f64))>,
}

impl<'a> FrameCompositor<'a> {
    pub fn new(
        assigner: &CellAssigner,
        colors: &'a BehaviorColorMap,
        timeline: &'a TimelineSegments,
        options: CompositorOptions,
        font: &'a FontArc,
    ) -> Self {
        let layout = CanvasLayout::new(
            assigner.size(),
            assigner.grid().num_cells(),
            options.draw_overlays,
        );
        let grid_lines = assigner
            .forward()
            .grid_lines(assigner.size(), assigner.grid());

        Self {
            colors,
            timeline,
            options,
            font,
            layout,
            grid_lines,
        }
    }

    pub fn layout(&self) -> CanvasLayout {
        self.layout
    }

    /// Compose the output frame for `frame_idx`.
    pub fn composite(
        &self,
        frame: &RgbImage,
        detections: &[Detection],
        frame_idx: u32,
        total_frames: u32,
    ) -> RgbImage {
        let (w, h) = self.layout.canvas_size();
        let mut canvas = Canvas::new(w, h, BACKGROUND, Some(self.font));
        canvas.paste(frame, 0, 0);

        if self.options.draw_grid {
            for &(from, to) in &self.grid_lines {
                canvas.line(from, to, GRID_COLOR, self.options.line_thickness.max(1));
            }
        }

        for det in detections {
            self.draw_detection(&mut canvas, det);
        }

        if self.options.draw_overlays {
            self.draw_legend(&mut canvas);
            self.draw_timeline(&mut canvas, frame_idx, total_frames);
        }

        canvas.into_image()
    }

    fn draw_detection(&self, canvas: &mut Canvas, det: &Detection) {
        let Some(tank) = det.tank_number else {
            return;
        };
        if !self.options.is_selected(tank) {
            return;
        }

        let color = self.colors.get(&det.class_name).unwrap_or(UNKNOWN_BEHAVIOR);

        match det.polygon.as_ref().and_then(|p| p.points()) {
            Some(points) => canvas.blend_polygon(points, color, POLYGON_ALPHA),
            None => canvas.rect_outline(det.x1, det.y1, det.x2, det.y2, color, BOX_THICKNESS),
        }

        // Label plate with the tank number, sitting on the box's top-left corner
        let label = tank.to_string();
        let (tw, th) = canvas.text_size(&label, LABEL_SCALE);
        let plate_top = det.y1 - th as f64 - 12.0;
        canvas.fill_rect(det.x1, plate_top, det.x1 + tw as f64, det.y1, color);
        canvas.text(&label, det.x1, det.y1 - 7.0 - th as f64, LABEL_SCALE, PLATE_TEXT);

        if let Some(centroid) = det.centroid() {
            canvas.dot(centroid, CENTROID_RADIUS, color);
        }
    }

    fn draw_legend(&self, canvas: &mut Canvas) {
        let x = self.layout.video.w() + LEGEND_X_OFFSET;

        for (i, (behavior, color)) in self.colors.sorted().into_iter().enumerate() {
            let y = LEGEND_Y_START + i as f64 * LEGEND_PITCH;
            canvas.fill_rect(x, y, x + LEGEND_BOX, y + LEGEND_BOX, color);

            let (_, th) = canvas.text_size(behavior, LEGEND_SCALE);
            let text_y = y + (LEGEND_BOX - th as f64) / 2.0;
            canvas.text(behavior, x + LEGEND_BOX + 10.0, text_y, LEGEND_SCALE, LEGEND_TEXT);
        }
    }

    fn draw_timeline(&self, canvas: &mut Canvas, frame_idx: u32, total_frames: u32) {
        let panel_h = self.layout.timeline_height();
        let num_cells = self.layout.num_cells;
        if panel_h == 0 || num_cells == 0 || total_frames <= 1 {
            return;
        }

        let panel_top = self.layout.video.h();
        let canvas_w = canvas.width() as f64;
        canvas.fill_rect(0.0, panel_top, canvas_w, canvas.height() as f64, PANEL_BACKGROUND);

        let area_x = TIMELINE_PAD_X;
        let area_y = panel_top + (TIMELINE_PAD_Y / 2.0).floor();
        let area_w = canvas_w - 2.0 * TIMELINE_PAD_X;
        let area_h = panel_h as f64 - TIMELINE_PAD_Y;
        if area_w <= 0.0 || area_h <= 0.0 {
            return;
        }

        let row_h = area_h / num_cells as f64;
        let bar_h = row_h * TIMELINE_BAR_FILL;
        let total = total_frames as f64;
        let frame_x = |f: f64| (area_x + f / total * area_w).floor();

        for tank in 1..=num_cells {
            let y = area_y + (tank - 1) as f64 * row_h;
            let (top, bottom) = (y.floor(), (y + bar_h).floor());
            canvas.fill_rect(area_x, top, area_x + area_w, bottom, BAR_COLOR);

            if let Some(segments) = self.timeline.get(&tank) {
                for segment in segments {
                    let color = self.colors.get(&segment.behavior).unwrap_or(UNKNOWN_SEGMENT);
                    let x_start = frame_x(segment.start_frame as f64);
                    let x_end = frame_x(segment.end_frame as f64 + 1.0);
                    canvas.fill_rect(x_start, top, x_end, bottom, color);
                }
            }

            let label = format!("T{tank}");
            let (_, th) = canvas.text_size(&label, TANK_LABEL_SCALE);
            let label_y = y + (bar_h - th as f64) / 2.0;
            canvas.text(&label, area_x - TIMELINE_LABEL_OFFSET, label_y, TANK_LABEL_SCALE, TANK_LABEL_TEXT);
        }

        let x = frame_x(frame_idx as f64);
        canvas.line((x, area_y), (x, area_y + area_h), INDICATOR_COLOR, INDICATOR_THICKNESS);
    }
}
