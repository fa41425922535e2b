// src/detection_io.rs
//
// Detection source files: locating them next to a video and reading them into
// a `DetectionTable`.
//
// Row-level problems never fail the file. Unparsable optional numerics become
// absent; rows whose required fields do not parse are skipped and counted.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::types::{Detection, DetectionTable, Polygon, REQUIRED_COLUMNS};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub rows: usize,
    pub skipped_rows: usize,
}

/// Find the detection CSV for a video.
///
/// Looks for `<stem>.csv` then `<stem>_detections.csv`, first in `csv_dir`
/// (when given) and then in the video's own folder.
pub fn resolve_detection_source(video: &Path, csv_dir: Option<&Path>) -> Option<PathBuf> {
    let stem = video.file_stem()?.to_string_lossy().to_string();
    let video_dir = video.parent().unwrap_or_else(|| Path::new("."));

    let mut dirs: Vec<&Path> = Vec::new();
    if let Some(dir) = csv_dir {
        dirs.push(dir);
    }
    dirs.push(video_dir);

    for dir in dirs {
        for name in [format!("{stem}.csv"), format!("{stem}_detections.csv")] {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Read a detection CSV.
pub fn read_detections(path: &Path) -> Result<(DetectionTable, ParseStats)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open detection file {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !headers.iter().any(|h| h == c))
        .collect();
    if !missing.is_empty() {
        bail!(
            "Detection file {} is missing required column(s): {}",
            path.display(),
            missing.join(", ")
        );
    }

    let index: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), i))
        .collect();

    let mut table = DetectionTable::new(headers.clone());
    let mut stats = ParseStats::default();

    for (line, record) in reader.records().enumerate() {
        stats.rows += 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!("⚠️  Skipping unreadable row {} in {}: {}", line + 2, path.display(), e);
                stats.skipped_rows += 1;
                continue;
            }
        };

        match parse_row(&record, &index, &headers) {
            Some(det) => table.push(det),
            None => {
                debug!("Skipping row {} in {}: bad required field", line + 2, path.display());
                stats.skipped_rows += 1;
            }
        }
    }

    if stats.skipped_rows > 0 {
        warn!(
            "⚠️  {} of {} rows in {} were skipped",
            stats.skipped_rows,
            stats.rows,
            path.display()
        );
    }

    Ok((table, stats))
}

/// Non-empty value of a named column.
fn get<'r>(record: &'r csv::StringRecord, index: &HashMap<&str, usize>, name: &str) -> Option<&'r str> {
    index
        .get(name)
        .and_then(|&i| record.get(i))
        .filter(|s| !s.is_empty())
}

fn parse_row(
    record: &csv::StringRecord,
    index: &HashMap<&str, usize>,
    headers: &[String],
) -> Option<Detection> {
    let field = |name: &str| get(record, index, name);

    let frame_idx = parse_frame_index(field("frame_idx")?)?;
    let x1 = parse_f64(field("x1"))?;
    let y1 = parse_f64(field("y1"))?;
    let x2 = parse_f64(field("x2"))?;
    let y2 = parse_f64(field("y2"))?;
    let class_name = field("class_name")?;

    let mut det = Detection::new(frame_idx, [x1, y1, x2, y2], class_name);
    det.confidence = parse_f64(field("confidence"));
    det.cx = parse_f64(field("cx"));
    det.cy = parse_f64(field("cy"));
    det.tank_number = field("tank_number").and_then(parse_frame_index);
    det.polygon = field("polygon").map(Polygon::parse);

    for (i, header) in headers.iter().enumerate() {
        if is_known_column(header) {
            continue;
        }
        if let Some(value) = record.get(i) {
            det.extra.insert(header.clone(), value.to_string());
        }
    }

    Some(det)
}

fn is_known_column(name: &str) -> bool {
    matches!(
        name,
        "frame_idx"
            | "x1"
            | "y1"
            | "x2"
            | "y2"
            | "class_name"
            | "confidence"
            | "cx"
            | "cy"
            | "tank_number"
            | "polygon"
    )
}

fn parse_f64(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Integer columns go through a float parse so `"12.0"` is accepted.
fn parse_frame_index(value: &str) -> Option<u32> {
    let v = value.parse::<f64>().ok()?;
    if !v.is_finite() || v < 0.0 || v > u32::MAX as f64 {
        return None;
    }
    Some(v.trunc() as u32)
}
