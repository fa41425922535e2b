// src/render/trajectory.rs
//
// Trajectory image: every tank's centroid path on a blank canvas.
//
// Paths are drawn in grid space (unrotated, unscaled, grid filling the whole
// frame) next to axis-aligned grid lines, then the finished canvas is warped
// through the forward grid transform so it lines up with the source video.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use std::path::Path;
use tracing::{info, warn};

use super::canvas::Canvas;
use crate::colors::tank_color;
use crate::grid::{CellAssigner, GridTransform};
use crate::segmentation::{max_gap_frames, split_trajectory, tank_tracks};
use crate::types::DetectionTable;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const GRID_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const PATH_THICKNESS: u32 = 2;

/// Render the trajectory image. Returns it with the number of polylines drawn.
pub fn render_trajectories(
    table: &DetectionTable,
    assigner: &CellAssigner,
    fps: f64,
    time_gap_seconds: f64,
    line_thickness: u32,
) -> (RgbImage, usize) {
    let size = assigner.size();
    let grid = assigner.grid();
    let mut canvas = Canvas::new(size.width, size.height, BACKGROUND, None);

    for (from, to) in GridTransform::identity().grid_lines(size, grid) {
        canvas.line(from, to, GRID_COLOR, line_thickness.max(1));
    }

    let max_gap = max_gap_frames(time_gap_seconds, fps);
    let tracks = tank_tracks(table, |x, y| assigner.to_grid_space(x, y));

    let mut polylines = 0;
    for (tank, points) in &tracks {
        let color = tank_color(*tank);
        for polyline in split_trajectory(points, max_gap) {
            canvas.polyline(&polyline, color, PATH_THICKNESS);
            polylines += 1;
        }
    }

    let grid_space = canvas.into_image();
    let image = match Projection::from_matrix(assigner.forward().to_row_major_f32()) {
        Some(projection) => warp(&grid_space, &projection, Interpolation::Bilinear, BACKGROUND),
        None => {
            warn!("⚠️  Grid transform has no projection form; trajectory left in grid space");
            grid_space
        }
    };

    (image, polylines)
}

/// Render and save `<base>_trajectory.png`. Returns the number of polylines.
pub fn export_trajectory_image(
    table: &DetectionTable,
    assigner: &CellAssigner,
    fps: f64,
    time_gap_seconds: f64,
    line_thickness: u32,
    path: &Path,
) -> Result<usize> {
    let (image, polylines) =
        render_trajectories(table, assigner, fps, time_gap_seconds, line_thickness);
    image
        .save(path)
        .with_context(|| format!("Failed to save trajectory image {}", path.display()))?;

    info!("💾 Trajectory image: {} paths → {}", polylines, path.display());
    Ok(polylines)
}
