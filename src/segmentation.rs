// src/segmentation.rs
//
// Temporal segmentation.
//
// Two deliberately different rules:
//
//   Behavior timeline  — strict contiguity. A segment ends when the label
//                        changes OR a single frame is missing. Timeline bars
//                        never bridge frames the tank had no detection on.
//
//   Trajectory lines   — elapsed time. A polyline may skip frames; it only
//                        breaks when the gap exceeds round(gap_seconds * fps).
//                        Polylines with fewer than two points are dropped.

use std::collections::BTreeMap;

use crate::cancel::CancelFlag;
use crate::types::{DetectionTable, TimelineSegment, TimelineSegments};

// ============================================================================
// BEHAVIOR TIMELINE
// ============================================================================

/// Per-tank `frame → behavior` map. When several detections of one frame land
/// in the same tank, the last one processed wins.
pub fn tank_behavior_frames(table: &DetectionTable) -> BTreeMap<u32, BTreeMap<u32, String>> {
    let mut tanks: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();
    for (&frame_idx, dets) in &table.frames {
        for det in dets {
            if let Some(tank) = det.tank_number {
                tanks
                    .entry(tank)
                    .or_default()
                    .insert(frame_idx, det.class_name.clone());
            }
        }
    }
    tanks
}

/// Run-length encode one tank's behavior history.
pub fn segment_behaviors(frames: &BTreeMap<u32, String>) -> Vec<TimelineSegment> {
    let mut segments = Vec::new();
    let mut iter = frames.iter();

    let Some((&first, first_behavior)) = iter.next() else {
        return segments;
    };

    let mut start = first;
    let mut prev = first;
    let mut current = first_behavior;

    for (&frame, behavior) in iter {
        if behavior != current || frame != prev + 1 {
            segments.push(TimelineSegment::new(start, prev, current.clone()));
            start = frame;
            current = behavior;
        }
        prev = frame;
    }
    segments.push(TimelineSegment::new(start, prev, current.clone()));

    segments
}

/// Timeline segments for every tank that had at least one detection.
pub fn build_timeline(table: &DetectionTable) -> TimelineSegments {
    build_timeline_cancellable(table, &CancelFlag::new()).unwrap_or_default()
}

/// Same as [`build_timeline`], polling `cancel` once per tank.
pub fn build_timeline_cancellable(
    table: &DetectionTable,
    cancel: &CancelFlag,
) -> Option<TimelineSegments> {
    let mut timeline = TimelineSegments::new();
    for (tank, frames) in tank_behavior_frames(table) {
        if cancel.is_cancelled() {
            return None;
        }
        if frames.is_empty() {
            continue;
        }
        timeline.insert(tank, segment_behaviors(&frames));
    }
    Some(timeline)
}

// ============================================================================
// TRAJECTORIES
// ============================================================================

/// Largest frame gap a trajectory may bridge.
pub fn max_gap_frames(time_gap_seconds: f64, fps: f64) -> u32 {
    let frames = (time_gap_seconds * fps).round();
    if frames.is_finite() && frames > 0.0 {
        frames as u32
    } else {
        0
    }
}

/// Break a frame-sorted point sequence into polylines at large time gaps.
pub fn split_trajectory(points: &[(u32, (f64, f64))], max_gap: u32) -> Vec<Vec<(f64, f64)>> {
    let mut polylines = Vec::new();
    let mut current: Vec<(f64, f64)> = Vec::new();
    let mut last_frame: Option<u32> = None;

    for &(frame, point) in points {
        if let Some(last) = last_frame {
            if frame.saturating_sub(last) > max_gap {
                if current.len() >= 2 {
                    polylines.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
        }
        current.push(point);
        last_frame = Some(frame);
    }

    if current.len() >= 2 {
        polylines.push(current);
    }

    polylines
}

/// Frame-sorted centroids per tank, mapped through `project`.
pub fn tank_tracks<F>(table: &DetectionTable, project: F) -> BTreeMap<u32, Vec<(u32, (f64, f64))>>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let mut tracks: BTreeMap<u32, Vec<(u32, (f64, f64))>> = BTreeMap::new();
    for (&frame_idx, dets) in &table.frames {
        for det in dets {
            if let (Some(tank), Some((cx, cy))) = (det.tank_number, det.centroid()) {
                tracks
                    .entry(tank)
                    .or_default()
                    .push((frame_idx, project(cx, cy)));
            }
        }
    }
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Detection;

    fn frames(entries: &[(u32, &str)]) -> BTreeMap<u32, String> {
        entries.iter().map(|(f, b)| (*f, b.to_string())).collect()
    }

    #[test]
    fn test_gap_forces_split_with_same_label() {
        let segs = segment_behaviors(&frames(&[(1, "swim"), (2, "swim"), (4, "swim")]));
        assert_eq!(
            segs,
            vec![
                TimelineSegment::new(1, 2, "swim"),
                TimelineSegment::new(4, 4, "swim")
            ]
        );
    }

    #[test]
    fn test_label_change_splits() {
        let segs = segment_behaviors(&frames(&[(1, "swim"), (2, "swim"), (3, "rest")]));
        assert_eq!(
            segs,
            vec![
                TimelineSegment::new(1, 2, "swim"),
                TimelineSegment::new(3, 3, "rest")
            ]
        );
    }

    #[test]
    fn test_empty_and_single() {
        assert!(segment_behaviors(&BTreeMap::new()).is_empty());
        assert_eq!(
            segment_behaviors(&frames(&[(7, "rest")])),
            vec![TimelineSegment::new(7, 7, "rest")]
        );
    }

    #[test]
    fn test_segments_partition_frames() {
        let input = frames(&[
            (0, "a"),
            (1, "a"),
            (2, "b"),
            (5, "b"),
            (6, "b"),
            (7, "a"),
            (9, "a"),
        ]);
        let segs = segment_behaviors(&input);
        let covered: Vec<u32> = segs
            .iter()
            .flat_map(|s| s.start_frame..=s.end_frame)
            .collect();
        assert_eq!(covered, input.keys().copied().collect::<Vec<_>>());
        let total: u32 = segs.iter().map(|s| s.len()).sum();
        assert_eq!(total as usize, input.len());
    }

    #[test]
    fn test_timeline_last_writer_wins() {
        let mut table = DetectionTable::default();
        let mut a = Detection::new(0, [0.0; 4], "swim");
        a.tank_number = Some(2);
        let mut b = Detection::new(0, [0.0; 4], "rest");
        b.tank_number = Some(2);
        let mut outside = Detection::new(1, [0.0; 4], "swim");
        outside.tank_number = None;
        table.push(a);
        table.push(b);
        table.push(outside);

        let timeline = build_timeline(&table);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[&2], vec![TimelineSegment::new(0, 0, "rest")]);
    }

    #[test]
    fn test_trajectory_breaks_on_time_gap() {
        let gap = max_gap_frames(1.0, 10.0);
        assert_eq!(gap, 10);
        let points = [(0, (0.0, 0.0)), (10, (1.0, 1.0)), (50, (2.0, 2.0))];
        let lines = split_trajectory(&points, gap);
        assert_eq!(lines, vec![vec![(0.0, 0.0), (1.0, 1.0)]]);
    }

    #[test]
    fn test_trajectory_skips_frames_under_threshold() {
        let points = [(0, (0.0, 0.0)), (3, (1.0, 0.0)), (6, (2.0, 0.0)), (30, (3.0, 0.0)), (31, (4.0, 0.0))];
        let lines = split_trajectory(&points, 5);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 3);
        assert_eq!(lines[1], vec![(3.0, 0.0), (4.0, 0.0)]);
    }

    #[test]
    fn test_max_gap_rounds() {
        assert_eq!(max_gap_frames(0.25, 30.0), 8);
        assert_eq!(max_gap_frames(1.0, 0.0), 0);
    }
}
