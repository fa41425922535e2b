// src/pipeline/mod.rs

pub mod batch;
pub mod event_bus;
pub mod export;
pub mod interactive;
pub mod metrics;

pub use batch::{BatchOrchestrator, BatchReport, BatchRequest};
pub use event_bus::{EventSink, LogLevel, PipelineEvent};
pub use export::{run_video_export, ExportOutcome, JobState, VideoExport};
pub use interactive::{DetectionJobRunner, DetectionSnapshot, JobUpdate};
pub use metrics::ThroughputMeter;
