// src/grid/transform.rs
//
// Affine map from grid space to video pixel space.
//
// Grid space is the video frame itself before the user moved, rotated or
// stretched the grid: cell (col, row) spans
//   [w*col/cols, w*(col+1)/cols) × [h*row/rows, h*(row+1)/rows)
// The pose then places that rectangle in the frame. Because the pose is stored
// in normalized coordinates, the same pose produces a different matrix for
// every video size, so transforms are rebuilt per video and never cached
// across videos.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};

/// Determinants below this are treated as singular.
const MIN_DETERMINANT: f64 = 1e-12;

/// Number of columns and rows of tanks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    pub cols: u32,
    pub rows: u32,
}

impl GridConfig {
    pub fn new(cols: u32, rows: u32) -> GridResult<Self> {
        let config = Self { cols, rows };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.cols == 0 || self.rows == 0 {
            return Err(GridError::InvalidShape {
                cols: self.cols,
                rows: self.rows,
            });
        }
        Ok(())
    }

    pub fn num_cells(&self) -> u32 {
        self.cols * self.rows
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { cols: 5, rows: 2 }
    }
}

/// Pixel dimensions of one source video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

impl VideoSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GridError::InvalidVideoSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    pub fn w(&self) -> f64 {
        self.width as f64
    }

    pub fn h(&self) -> f64 {
        self.height as f64
    }
}

/// User-adjustable placement of the grid, independent of video size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPose {
    /// Grid center as a fraction of the frame (0.5, 0.5 = frame center)
    pub center: (f64, f64),
    /// Clockwise rotation in degrees (y axis points down)
    pub angle_degrees: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl Default for GridPose {
    fn default() -> Self {
        Self {
            center: (0.5, 0.5),
            angle_degrees: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

impl GridPose {
    pub fn update_center(&mut self, u: f64, v: f64) {
        self.center = (u, v);
    }

    pub fn update_rotation(&mut self, angle_degrees: f64) {
        self.angle_degrees = angle_degrees;
    }

    pub fn update_scale(&mut self, scale_x: f64, scale_y: f64) {
        self.scale_x = scale_x;
        self.scale_y = scale_y;
    }

    /// Back to a centered, unrotated, unscaled grid.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Forward (grid → pixel) or inverse (pixel → grid) affine map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridTransform {
    matrix: Matrix3<f64>,
}

impl GridTransform {
    /// Build the grid → pixel transform for one video.
    ///
    /// The step order matters and mirrors how the grid is edited: the grid is
    /// first centered on the origin, then scaled, rotated and finally moved to
    /// the pose center. Steps are composed right-to-left, so they are listed
    /// here in the reverse of the order they act on a point.
    pub fn build(pose: &GridPose, size: VideoSize) -> Self {
        let (w, h) = (size.w(), size.h());

        let mut m: Matrix3<f64> = Matrix3::identity();
        m = m * translation(pose.center.0 * w, pose.center.1 * h);
        m = m * rotation(pose.angle_degrees);
        m = m * scaling(pose.scale_x, pose.scale_y);
        m = m * translation(-w / 2.0, -h / 2.0);

        Self { matrix: m }
    }

    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.matrix * Vector3::new(x, y, 1.0);
        (p.x, p.y)
    }

    /// Inverse map; fails instead of guessing when the pose collapsed the grid.
    pub fn inverse(&self) -> GridResult<Self> {
        let determinant = self.matrix.determinant();
        let finite = self.matrix.iter().all(|v| v.is_finite());

        if !finite || !determinant.is_finite() || determinant.abs() < MIN_DETERMINANT {
            return Err(GridError::NotInvertible { determinant });
        }

        self.matrix
            .try_inverse()
            .map(|matrix| Self { matrix })
            .ok_or(GridError::NotInvertible { determinant })
    }

    /// Grid lines in pixel space: `cols + 1` vertical lines followed by
    /// `rows + 1` horizontal ones.
    pub fn grid_lines(&self, size: VideoSize, grid: GridConfig) -> Vec<((f64, f64), (f64, f64))> {
        let (w, h) = (size.w(), size.h());
        let mut lines = Vec::with_capacity((grid.cols + grid.rows + 2) as usize);

        for i in 0..=grid.cols {
            let x = w * i as f64 / grid.cols as f64;
            lines.push((self.apply(x, 0.0), self.apply(x, h)));
        }
        for j in 0..=grid.rows {
            let y = h * j as f64 / grid.rows as f64;
            lines.push((self.apply(0.0, y), self.apply(w, y)));
        }

        lines
    }

    /// Row-major 3x3 as f32, the layout `imageproc` projections expect.
    pub fn to_row_major_f32(&self) -> [f32; 9] {
        let m = &self.matrix;
        [
            m[(0, 0)] as f32,
            m[(0, 1)] as f32,
            m[(0, 2)] as f32,
            m[(1, 0)] as f32,
            m[(1, 1)] as f32,
            m[(1, 2)] as f32,
            m[(2, 0)] as f32,
            m[(2, 1)] as f32,
            m[(2, 2)] as f32,
        ]
    }
}

fn translation(dx: f64, dy: f64) -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0)
}

/// Positive angles turn clockwise on screen because y grows downward.
fn rotation(angle_degrees: f64) -> Matrix3<f64> {
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0)
}

fn scaling(sx: f64, sy: f64) -> Matrix3<f64> {
    Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn close(a: (f64, f64), b: (f64, f64)) -> bool {
        (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6
    }

    #[test]
    fn test_default_pose_is_identity() {
        let t = GridTransform::build(&GridPose::default(), VideoSize::new(640, 480));
        assert!(close(t.apply(0.0, 0.0), (0.0, 0.0)));
        assert!(close(t.apply(640.0, 480.0), (640.0, 480.0)));
        assert!(close(t.apply(123.5, 77.25), (123.5, 77.25)));
    }

    #[test]
    fn test_center_offset_translates() {
        let mut pose = GridPose::default();
        pose.update_center(0.75, 0.5);
        let t = GridTransform::build(&pose, VideoSize::new(400, 200));
        // Grid center (200, 100) lands at 0.75 * 400
        assert!(close(t.apply(200.0, 100.0), (300.0, 100.0)));
    }

    #[test]
    fn test_rotation_is_clockwise_on_screen() {
        let mut pose = GridPose::default();
        pose.update_rotation(90.0);
        let t = GridTransform::build(&pose, VideoSize::new(200, 200));
        // A point right of center rotates to below center (y down)
        assert!(close(t.apply(150.0, 100.0), (100.0, 150.0)));
    }

    #[test]
    fn test_scale_applies_around_center() {
        let mut pose = GridPose::default();
        pose.update_scale(0.5, 2.0);
        let t = GridTransform::build(&pose, VideoSize::new(200, 100));
        assert!(close(t.apply(0.0, 0.0), (50.0, -50.0)));
        assert!(close(t.apply(100.0, 50.0), (100.0, 50.0)));
    }

    #[test]
    fn test_inverse_round_trip() {
        let pose = GridPose {
            center: (0.4, 0.6),
            angle_degrees: 33.0,
            scale_x: 0.8,
            scale_y: 1.3,
        };
        let t = GridTransform::build(&pose, VideoSize::new(1280, 720));
        let inv = t.inverse().unwrap();
        for &(x, y) in &[(0.0, 0.0), (640.0, 360.0), (1000.5, 12.25)] {
            let (px, py) = t.apply(x, y);
            let (bx, by) = inv.apply(px, py);
            assert!((bx - x).abs() < EPS * 1e4);
            assert!((by - y).abs() < EPS * 1e4);
        }
    }

    #[test]
    fn test_zero_scale_is_not_invertible() {
        let mut pose = GridPose::default();
        pose.update_scale(0.0, 1.0);
        let t = GridTransform::build(&pose, VideoSize::new(640, 480));
        assert!(matches!(t.inverse(), Err(GridError::NotInvertible { .. })));
    }

    #[test]
    fn test_grid_lines_count_and_endpoints() {
        let t = GridTransform::identity();
        let lines = t.grid_lines(VideoSize::new(500, 200), GridConfig { cols: 5, rows: 2 });
        assert_eq!(lines.len(), 6 + 3);
        assert!(close(lines[1].0, (100.0, 0.0)));
        assert!(close(lines[1].1, (100.0, 200.0)));
        assert!(close(lines[7].0, (0.0, 100.0)));
    }

    #[test]
    fn test_pose_reset() {
        let mut pose = GridPose {
            center: (0.1, 0.2),
            angle_degrees: 45.0,
            scale_x: 3.0,
            scale_y: 0.2,
        };
        pose.reset();
        assert_eq!(pose, GridPose::default());
    }

    #[test]
    fn test_grid_config_rejects_empty_shape() {
        assert!(GridConfig::new(0, 3).is_err());
        assert_eq!(GridConfig::new(4, 3).unwrap().num_cells(), 12);
    }
}
