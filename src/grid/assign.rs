// src/grid/assign.rs
//
// Point → tank assignment. A pixel is pulled back into grid space through the
// inverse transform and bucketed by the unrotated cell size.

use super::transform::{GridConfig, GridPose, GridTransform, VideoSize};
use crate::error::GridResult;

/// Classify a pixel-space point into a 1-based, row-major cell id.
///
/// Returns `None` when the point falls outside the grid. The half-open bounds
/// mean a point exactly on the right/bottom border belongs to no cell.
pub fn classify(
    point: (f64, f64),
    size: VideoSize,
    grid: GridConfig,
    inverse: &GridTransform,
) -> Option<u32> {
    let (w, h) = (size.w(), size.h());
    let (tx, ty) = inverse.apply(point.0, point.1);

    if !(tx >= 0.0 && tx < w && ty >= 0.0 && ty < h) {
        return None;
    }

    let cell_w = w / grid.cols as f64;
    let cell_h = h / grid.rows as f64;

    let col = ((tx / cell_w).floor() as i64).clamp(0, grid.cols as i64 - 1) as u32;
    let row = ((ty / cell_h).floor() as i64).clamp(0, grid.rows as i64 - 1) as u32;

    Some(row * grid.cols + col + 1)
}

/// Pre-inverted transform bound to one video, for classifying many points.
#[derive(Debug, Clone, Copy)]
pub struct CellAssigner {
    forward: GridTransform,
    inverse: GridTransform,
    size: VideoSize,
    grid: GridConfig,
}

impl CellAssigner {
    pub fn new(pose: &GridPose, size: VideoSize, grid: GridConfig) -> GridResult<Self> {
        grid.validate()?;
        size.validate()?;
        let forward = GridTransform::build(pose, size);
        let inverse = forward.inverse()?;
        Ok(Self {
            forward,
            inverse,
            size,
            grid,
        })
    }

    pub fn classify(&self, x: f64, y: f64) -> Option<u32> {
        classify((x, y), self.size, self.grid, &self.inverse)
    }

    /// Pixel → grid space.
    pub fn to_grid_space(&self, x: f64, y: f64) -> (f64, f64) {
        self.inverse.apply(x, y)
    }

    pub fn forward(&self) -> &GridTransform {
        &self.forward
    }

    pub fn inverse(&self) -> &GridTransform {
        &self.inverse
    }

    pub fn size(&self) -> VideoSize {
        self.size
    }

    pub fn grid(&self) -> GridConfig {
        self.grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GridError;

    /// Cell containing a grid-space point, computed without any transform.
    fn cell_containing(p: (f64, f64), size: VideoSize, grid: GridConfig) -> u32 {
        let col = (p.0 / (size.w() / grid.cols as f64)).floor() as u32;
        let row = (p.1 / (size.h() / grid.rows as f64)).floor() as u32;
        row * grid.cols + col + 1
    }

    #[test]
    fn test_cell_numbering_five_by_two() {
        // 5x2 grid in a 500x200 frame: one cell is 100x100 px
        let size = VideoSize::new(500, 200);
        let grid = GridConfig { cols: 5, rows: 2 };
        let assigner = CellAssigner::new(&GridPose::default(), size, grid).unwrap();

        assert_eq!(assigner.classify(450.0, 50.0), Some(5));
        assert_eq!(assigner.classify(10.0, 110.0), Some(6));
        assert_eq!(assigner.classify(0.0, 0.0), Some(1));
        assert_eq!(assigner.classify(499.9, 199.9), Some(10));
    }

    #[test]
    fn test_outside_grid_is_none() {
        let size = VideoSize::new(500, 200);
        let grid = GridConfig { cols: 5, rows: 2 };
        let assigner = CellAssigner::new(&GridPose::default(), size, grid).unwrap();

        assert_eq!(assigner.classify(-0.5, 10.0), None);
        assert_eq!(assigner.classify(500.0, 10.0), None);
        assert_eq!(assigner.classify(10.0, 200.0), None);
    }

    #[test]
    fn test_shrunken_grid_excludes_corners() {
        let mut pose = GridPose::default();
        pose.update_scale(0.5, 0.5);
        let size = VideoSize::new(400, 400);
        let assigner = CellAssigner::new(&pose, size, GridConfig { cols: 2, rows: 2 }).unwrap();

        // Grid now covers [100, 300) in both axes
        assert_eq!(assigner.classify(50.0, 50.0), None);
        assert_eq!(assigner.classify(150.0, 150.0), Some(1));
        assert_eq!(assigner.classify(250.0, 150.0), Some(2));
        assert_eq!(assigner.classify(150.0, 250.0), Some(3));
    }

    #[test]
    fn test_forward_then_classify_round_trip() {
        let size = VideoSize::new(1280, 720);
        let grid = GridConfig { cols: 4, rows: 3 };
        let poses = [
            GridPose::default(),
            GridPose {
                center: (0.45, 0.55),
                angle_degrees: 17.0,
                scale_x: 0.7,
                scale_y: 0.9,
            },
            GridPose {
                center: (0.5, 0.5),
                angle_degrees: -135.0,
                scale_x: 1.4,
                scale_y: 0.3,
            },
            GridPose {
                center: (0.2, 0.8),
                angle_degrees: 270.0,
                scale_x: -1.0,
                scale_y: 2.0,
            },
        ];

        for pose in &poses {
            let assigner = CellAssigner::new(pose, size, grid).unwrap();
            // Sample interior points away from cell borders
            for gx in (0..32).map(|i| 20.0 + i as f64 * 39.3) {
                for gy in (0..18).map(|j| 20.0 + j as f64 * 38.7) {
                    let (px, py) = assigner.forward().apply(gx, gy);
                    let expected = cell_containing((gx, gy), size, grid);
                    let cell_w = size.w() / grid.cols as f64;
                    let cell_h = size.h() / grid.rows as f64;
                    let near_border = (gx % cell_w).min(cell_w - gx % cell_w) < 1e-3
                        || (gy % cell_h).min(cell_h - gy % cell_h) < 1e-3;
                    if near_border {
                        continue;
                    }
                    assert_eq!(assigner.classify(px, py), Some(expected), "pose {:?}", pose);
                }
            }
        }
    }

    #[test]
    fn test_degenerate_pose_is_fatal() {
        let mut pose = GridPose::default();
        pose.update_scale(1.0, 0.0);
        let err = CellAssigner::new(&pose, VideoSize::new(640, 480), GridConfig::default())
            .unwrap_err();
        assert!(matches!(err, GridError::NotInvertible { .. }));
    }
}
