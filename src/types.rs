// src/types.rs

use std::collections::BTreeMap;

/// Columns every detection source must provide.
pub const REQUIRED_COLUMNS: [&str; 6] = ["frame_idx", "x1", "y1", "x2", "y2", "class_name"];

/// Columns the enricher guarantees on export, appended when missing.
pub const ENRICHED_COLUMNS: [&str; 3] = ["tank_number", "cx", "cy"];

/// Optional segmentation mask attached to a detection.
///
/// A malformed mask is kept (with its raw text) rather than dropped so the
/// exporter can write the row back unchanged and the renderer can fall back
/// to the bounding box.
#[derive(Debug, Clone, PartialEq)]
pub enum Polygon {
    Points { raw: String, points: Vec<(f64, f64)> },
    Malformed { raw: String },
}

impl Polygon {
    /// Parse a mask string such as `"10,20 30,20 30,40"`, `"10 20;30 20;30 40"`
    /// or `"[[10, 20], [30, 20], [30, 40]]"`: any run of numbers read as
    /// alternating x/y. Fewer than three points, an odd number count or any
    /// non-numeric token makes the mask malformed.
    pub fn parse(raw: &str) -> Self {
        let owned = raw.to_string();
        let tokens: Vec<&str> = raw
            .split(|c: char| c == ',' || c == ';' || c == '[' || c == ']' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();

        let values: Option<Vec<f64>> = tokens
            .iter()
            .map(|t| t.parse::<f64>().ok().filter(|v| v.is_finite()))
            .collect();

        match values {
            Some(values) if values.len() % 2 == 0 && values.len() >= 6 => Polygon::Points {
                raw: owned,
                points: values.chunks(2).map(|c| (c[0], c[1])).collect(),
            },
            _ => Polygon::Malformed { raw: owned },
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Polygon::Points { raw, .. } | Polygon::Malformed { raw } => raw,
        }
    }

    /// Points when well-formed.
    pub fn points(&self) -> Option<&[(f64, f64)]> {
        match self {
            Polygon::Points { points, .. } => Some(points),
            Polygon::Malformed { .. } => None,
        }
    }
}

/// One object instance on one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub frame_idx: u32,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub class_name: String,
    pub confidence: Option<f64>,
    pub polygon: Option<Polygon>,
    pub cx: Option<f64>,
    pub cy: Option<f64>,
    pub tank_number: Option<u32>,
    /// Source columns this crate does not interpret, keyed by header name.
    pub extra: BTreeMap<String, String>,
}

impl Detection {
    pub fn new(frame_idx: u32, bbox: [f64; 4], class_name: impl Into<String>) -> Self {
        Self {
            frame_idx,
            x1: bbox[0],
            y1: bbox[1],
            x2: bbox[2],
            y2: bbox[3],
            class_name: class_name.into(),
            confidence: None,
            polygon: None,
            cx: None,
            cy: None,
            tank_number: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn box_center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn centroid(&self) -> Option<(f64, f64)> {
        match (self.cx, self.cy) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        }
    }
}

/// Detections grouped by frame, plus the header order of the source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionTable {
    pub headers: Vec<String>,
    pub frames: BTreeMap<u32, Vec<Detection>>,
}

impl DetectionTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            frames: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, det: Detection) {
        self.frames.entry(det.frame_idx).or_default().push(det);
    }

    pub fn frame(&self, frame_idx: u32) -> &[Detection] {
        self.frames
            .get(&frame_idx)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.frames.values().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Detection> {
        self.frames.values_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.frames.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source headers followed by any enrichment column the source lacked.
    pub fn export_headers(&self) -> Vec<String> {
        let mut headers = self.headers.clone();
        for col in ENRICHED_COLUMNS {
            if !headers.iter().any(|h| h == col) {
                headers.push(col.to_string());
            }
        }
        headers
    }
}

/// Contiguous run of one behavior in one tank; `end_frame` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineSegment {
    pub start_frame: u32,
    pub end_frame: u32,
    pub behavior: String,
}

impl TimelineSegment {
    pub fn new(start_frame: u32, end_frame: u32, behavior: impl Into<String>) -> Self {
        Self {
            start_frame,
            end_frame,
            behavior: behavior.into(),
        }
    }

    pub fn len(&self) -> u32 {
        self.end_frame - self.start_frame + 1
    }
}

/// Segments per tank number, ordered by tank.
pub type TimelineSegments = BTreeMap<u32, Vec<TimelineSegment>>;
