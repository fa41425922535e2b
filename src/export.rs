// src/export.rs
//
// Tabular exports of an enriched detection table:
//
//   <base>_with_tanks.csv       long format, source columns + tank_number/cx/cy
//   <base>_centroids_wide.csv   one row per frame, x/y column pair per tank
//   <base>_by_tank.xlsx         one worksheet per tank
//
// Floating point values are always written with 4 decimals.

use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::types::{Detection, DetectionTable};

/// Columns holding floating point values.
const FLOAT_COLUMNS: [&str; 7] = ["x1", "y1", "x2", "y2", "cx", "cy", "confidence"];

fn fmt4(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.4}")).unwrap_or_default()
}

/// Text value of one column of one detection, as written to CSV.
pub fn column_value(det: &Detection, column: &str) -> String {
    match column {
        "frame_idx" => det.frame_idx.to_string(),
        "x1" => fmt4(Some(det.x1)),
        "y1" => fmt4(Some(det.y1)),
        "x2" => fmt4(Some(det.x2)),
        "y2" => fmt4(Some(det.y2)),
        "cx" => fmt4(det.cx),
        "cy" => fmt4(det.cy),
        "confidence" => fmt4(det.confidence),
        "class_name" => det.class_name.clone(),
        "tank_number" => det.tank_number.map(|t| t.to_string()).unwrap_or_default(),
        "polygon" => det
            .polygon
            .as_ref()
            .map(|p| p.raw().to_string())
            .unwrap_or_default(),
        other => det.extra.get(other).cloned().unwrap_or_default(),
    }
}

fn numeric_value(det: &Detection, column: &str) -> Option<f64> {
    match column {
        "frame_idx" => Some(det.frame_idx as f64),
        "x1" => Some(det.x1),
        "y1" => Some(det.y1),
        "x2" => Some(det.x2),
        "y2" => Some(det.y2),
        "cx" => det.cx,
        "cy" => det.cy,
        "confidence" => det.confidence,
        _ => None,
    }
}

// ============================================================================
// ENRICHED CSV
// ============================================================================

/// Write every detection, in frame order, with the source columns plus the
/// enrichment columns. Returns the number of data rows.
pub fn export_enriched_csv(table: &DetectionTable, path: &Path) -> Result<usize> {
    let headers = table.export_headers();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(&headers)?;
    let mut rows = 0;
    for det in table.iter() {
        let record: Vec<String> = headers.iter().map(|h| column_value(det, h)).collect();
        writer.write_record(&record)?;
        rows += 1;
    }
    writer.flush()?;

    info!("💾 Enriched CSV: {} rows → {}", rows, path.display());
    Ok(rows)
}

// ============================================================================
// WIDE CENTROID CSV
// ============================================================================

/// Frame → (tank index 0-based → centroid) for every assigned detection.
fn centroids_by_frame(table: &DetectionTable, num_tanks: u32) -> BTreeMap<u32, BTreeMap<u32, (f64, f64)>> {
    let mut frames: BTreeMap<u32, BTreeMap<u32, (f64, f64)>> = BTreeMap::new();
    for det in table.iter() {
        let (Some(tank), Some(centroid)) = (det.tank_number, det.centroid()) else {
            continue;
        };
        let index = tank - 1;
        if index < num_tanks {
            frames.entry(det.frame_idx).or_default().insert(index, centroid);
        }
    }
    frames
}

/// Header of the wide export: `position,x0,y0,...`.
pub fn centroid_headers(num_tanks: u32) -> Vec<String> {
    let mut headers = vec!["position".to_string()];
    for i in 0..num_tanks {
        headers.push(format!("x{i}"));
        headers.push(format!("y{i}"));
    }
    headers
}

/// One row per frame from the first to the last assigned detection, frames
/// without data included as blank rows. Returns the number of data rows
/// (0 when nothing was assigned; the header is still written).
pub fn export_centroid_csv(table: &DetectionTable, num_tanks: u32, path: &Path) -> Result<usize> {
    let frames = centroids_by_frame(table, num_tanks);
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(centroid_headers(num_tanks))?;

    let (Some(&first), Some(&last)) = (frames.keys().next(), frames.keys().next_back()) else {
        writer.flush()?;
        return Ok(0);
    };

    let empty = BTreeMap::new();
    for frame_idx in first..=last {
        let tanks = frames.get(&frame_idx).unwrap_or(&empty);
        let mut record = Vec::with_capacity(1 + 2 * num_tanks as usize);
        record.push(frame_idx.to_string());
        for tank in 0..num_tanks {
            match tanks.get(&tank) {
                Some(&(x, y)) => {
                    record.push(format!("{x:.4}"));
                    record.push(format!("{y:.4}"));
                }
                None => {
                    record.push(String::new());
                    record.push(String::new());
                }
            }
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;

    let rows = (last - first + 1) as usize;
    info!("💾 Centroid CSV: {} frames → {}", rows, path.display());
    Ok(rows)
}

// ============================================================================
// PER-TANK WORKBOOK
// ============================================================================

pub fn sheet_name(tank: u32) -> String {
    format!("Tank_{tank}")
}

/// One worksheet per tank (`Tank_1` … `Tank_N`), `tank_number` column dropped.
pub fn export_tank_workbook(table: &DetectionTable, num_tanks: u32, path: &Path) -> Result<()> {
    let headers: Vec<String> = table
        .export_headers()
        .into_iter()
        .filter(|h| h != "tank_number")
        .collect();

    let mut by_tank: BTreeMap<u32, Vec<&Detection>> = BTreeMap::new();
    for det in table.iter() {
        if let Some(tank) = det.tank_number {
            by_tank.entry(tank).or_default().push(det);
        }
    }

    let decimals = Format::new().set_num_format("0.0000");
    let header_format = Format::new().set_bold();
    let mut workbook = Workbook::new();

    for tank in 1..=num_tanks {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet_name(tank))?;

        for (col, header) in headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, header.as_str(), &header_format)?;
        }

        let dets = by_tank.get(&tank).map(|v| v.as_slice()).unwrap_or(&[]);
        for (i, det) in dets.iter().enumerate() {
            let row = (i + 1) as u32;
            for (col, header) in headers.iter().enumerate() {
                let col = col as u16;
                if header == "frame_idx" {
                    worksheet.write_number(row, col, det.frame_idx as f64)?;
                } else if FLOAT_COLUMNS.contains(&header.as_str()) {
                    if let Some(v) = numeric_value(det, header) {
                        worksheet.write_number_with_format(row, col, v, &decimals)?;
                    }
                } else {
                    let value = column_value(det, header);
                    if !value.is_empty() {
                        worksheet.write_string(row, col, value.as_str())?;
                    }
                }
            }
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to save workbook {}", path.display()))?;

    info!("💾 Workbook: {} sheets → {}", num_tanks, path.display());
    Ok(())
}
