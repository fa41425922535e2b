// src/render/mod.rs
//
// Raster output: annotated frames and trajectory images. Everything here
// works on RGB `image` buffers; codec channel order is handled in
// video_processor.

pub mod canvas;
pub mod compositor;
pub mod trajectory;

pub use canvas::{default_font, load_font, resolve_font, Canvas};
pub use compositor::{CanvasLayout, CompositorOptions, FrameCompositor};
pub use trajectory::{export_trajectory_image, render_trajectories};
