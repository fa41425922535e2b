// src/grid/mod.rs
//
// Grid geometry.
//
//   GridPose + VideoSize ─→ transform::GridTransform ─┬→ grid lines (drawing)
//                                                     └→ inverse ─→ assign::classify ─→ cell id
//
// Everything here is pure; no I/O, no shared state.

pub mod assign;
pub mod transform;

pub use assign::{classify, CellAssigner};
pub use transform::{GridConfig, GridPose, GridTransform, VideoSize};
