// src/lib.rs
//
// Grid-based tank assignment for per-frame animal detections, with behavior
// timelines, tabular exports and annotated video rendering.
//
//   detection_io ─→ enrichment (grid) ─→ segmentation ─┬→ export (csv/xlsx)
//                                                      ├→ render::trajectory
//                                                      └→ render::compositor ─→ pipeline::export
//
// pipeline::batch runs that chain per video; pipeline::interactive runs the
// enrichment half in the background for an editing session.

pub mod cancel;
pub mod colors;
pub mod config;
pub mod detection_io;
pub mod enrichment;
pub mod error;
pub mod export;
pub mod grid;
pub mod pipeline;
pub mod render;
pub mod segmentation;
pub mod types;
pub mod video_processor;

pub use cancel::CancelFlag;
pub use config::{AppConfig, SettingsBundle};
pub use error::{ConfigError, GridError};
