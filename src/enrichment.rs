// src/enrichment.rs
//
// Writes centroid and tank membership back onto every detection.
//
// Centroid rule (shared by the interactive and batch paths): a detection that
// already carries both `cx` and `cy` keeps them, anything else gets the box
// center. Re-running over the same table therefore changes nothing.

use tracing::debug;

use crate::cancel::CancelFlag;
use crate::grid::CellAssigner;
use crate::types::{Detection, DetectionTable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub total: usize,
    pub assigned: usize,
    pub outside_grid: usize,
    pub centroids_computed: usize,
}

/// Enrich a single detection. Returns whether the centroid was computed here.
pub fn enrich_detection(det: &mut Detection, assigner: &CellAssigner) -> bool {
    let (cx, cy, computed) = match det.centroid().filter(|(x, y)| x.is_finite() && y.is_finite()) {
        Some((x, y)) => (x, y, false),
        None => {
            let (x, y) = det.box_center();
            (x, y, true)
        }
    };

    det.cx = Some(cx);
    det.cy = Some(cy);
    det.tank_number = assigner.classify(cx, cy);
    computed
}

/// Enrich the whole table.
pub fn enrich(table: &mut DetectionTable, assigner: &CellAssigner) -> EnrichStats {
    enrich_cancellable(table, assigner, &CancelFlag::new()).unwrap_or_default()
}

/// Enrich the whole table, polling `cancel` once per frame.
///
/// Returns `None` when cancelled; the table is then partially enriched and
/// should be discarded by the caller.
pub fn enrich_cancellable(
    table: &mut DetectionTable,
    assigner: &CellAssigner,
    cancel: &CancelFlag,
) -> Option<EnrichStats> {
    let mut stats = EnrichStats::default();

    for dets in table.frames.values_mut() {
        if cancel.is_cancelled() {
            return None;
        }
        for det in dets.iter_mut() {
            stats.total += 1;
            if enrich_detection(det, assigner) {
                stats.centroids_computed += 1;
            }
            match det.tank_number {
                Some(_) => stats.assigned += 1,
                None => stats.outside_grid += 1,
            }
        }
    }

    debug!(
        "Enriched {} detections: {} in grid, {} outside, {} centroids computed",
        stats.total, stats.assigned, stats.outside_grid, stats.centroids_computed
    );

    Some(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridConfig, GridPose, VideoSize};

    fn assigner() -> CellAssigner {
        let pose = GridPose {
            center: (0.5, 0.5),
            angle_degrees: 12.0,
            scale_x: 0.9,
            scale_y: 0.95,
        };
        CellAssigner::new(&pose, VideoSize::new(500, 200), GridConfig { cols: 5, rows: 2 }).unwrap()
    }

    fn sample_table() -> DetectionTable {
        let mut table = DetectionTable::default();
        table.push(Detection::new(0, [40.0, 40.0, 60.0, 60.0], "swim"));
        table.push(Detection::new(0, [440.0, 140.0, 460.0, 160.0], "rest"));
        table.push(Detection::new(1, [-90.0, -90.0, -70.0, -70.0], "swim"));
        let mut with_centroid = Detection::new(2, [0.0, 0.0, 10.0, 10.0], "swim");
        with_centroid.cx = Some(250.0);
        with_centroid.cy = Some(100.0);
        table.push(with_centroid);
        table
    }

    #[test]
    fn test_enrich_assigns_cells_and_centroids() {
        let mut table = sample_table();
        let stats = enrich(&mut table, &assigner());

        assert_eq!(stats.total, 4);
        assert_eq!(stats.centroids_computed, 3);
        assert_eq!(stats.outside_grid, 1);

        let first = &table.frame(0)[0];
        assert_eq!((first.cx, first.cy), (Some(50.0), Some(50.0)));
        assert_eq!(first.tank_number, Some(1));
        assert_eq!(table.frame(0)[1].tank_number, Some(10));
        assert_eq!(table.frame(1)[0].tank_number, None);

        // Supplied centroid wins over the box
        let kept = &table.frame(2)[0];
        assert_eq!((kept.cx, kept.cy), (Some(250.0), Some(100.0)));
        assert!(kept.tank_number.is_some());
    }

    #[test]
    fn test_enrich_is_idempotent() {
        let a = assigner();
        let mut once = sample_table();
        enrich(&mut once, &a);
        let mut twice = once.clone();
        enrich(&mut twice, &a);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_enrich_respects_cancel() {
        let mut table = sample_table();
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(enrich_cancellable(&mut table, &assigner(), &cancel).is_none());
    }

    #[test]
    fn test_assignment_in_range() {
        let mut table = sample_table();
        enrich(&mut table, &assigner());
        for det in table.iter() {
            if let Some(t) = det.tank_number {
                assert!((1..=10).contains(&t));
            }
        }
    }
}
