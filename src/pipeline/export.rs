// src/pipeline/export.rs
//
// Annotated video export for one video:
//
//   Pending → Decoding → (Compositing → Encoding)* → Finished | Cancelled | Failed
//
// Enrichment and segmentation have already run; this only walks frames.
// Cancellation is polled once per frame. The encoder is released on every
// exit path before the outcome is returned.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use super::event_bus::{EventSink, PipelineEvent};
use super::metrics::{percent, ThroughputMeter};
use crate::cancel::CancelFlag;
use crate::render::FrameCompositor;
use crate::types::DetectionTable;
use crate::video_processor::{FrameSink, FrameSource, MediaBackend};

/// Timing events are emitted every this many frames.
const TIMING_INTERVAL: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Decoding,
    Compositing,
    Encoding,
    Finished,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Finished { frames: u32 },
    Cancelled { frames: u32 },
}

pub struct VideoExport<'a> {
    pub source: &'a Path,
    pub output: &'a Path,
    pub table: &'a DetectionTable,
    pub compositor: &'a FrameCompositor<'a>,
}

struct ExportJob<'a> {
    state: JobState,
    events: &'a EventSink,
    cancel: &'a CancelFlag,
}

impl ExportJob<'_> {
    fn transition(&mut self, next: JobState) {
        if self.state != next {
            debug!("Export job {:?} → {:?}", self.state, next);
            self.state = next;
        }
    }
}

/// Render every frame of `export.source` into `export.output`.
pub fn run_video_export(
    backend: &dyn MediaBackend,
    export: &VideoExport,
    cancel: &CancelFlag,
    events: &EventSink,
) -> Result<ExportOutcome> {
    let mut job = ExportJob {
        state: JobState::Pending,
        events,
        cancel,
    };

    let result = open_and_encode(backend, export, &mut job);
    match &result {
        Ok(ExportOutcome::Finished { .. }) => job.transition(JobState::Finished),
        Ok(ExportOutcome::Cancelled { .. }) => job.transition(JobState::Cancelled),
        Err(_) => job.transition(JobState::Failed),
    }
    result
}

fn open_and_encode(
    backend: &dyn MediaBackend,
    export: &VideoExport,
    job: &mut ExportJob,
) -> Result<ExportOutcome> {
    job.transition(JobState::Decoding);
    let mut source = backend
        .open(export.source)
        .with_context(|| format!("Could not open video: {}", export.source.display()))?;
    let info = source.info();

    let (width, height) = export.compositor.layout().canvas_size();
    let mut writer = backend
        .create_writer(export.output, width, height, info.effective_fps())
        .with_context(|| format!("Could not open video writer for: {}", export.output.display()))?;

    let encoded = encode_frames(source.as_mut(), writer.as_mut(), export, info.total_frames, job);
    let released = writer
        .release()
        .with_context(|| format!("Failed to finalize {}", export.output.display()));

    let outcome = encoded?;
    released?;
    Ok(outcome)
}

fn encode_frames(
    source: &mut dyn FrameSource,
    writer: &mut dyn FrameSink,
    export: &VideoExport,
    total_frames: u32,
    job: &mut ExportJob,
) -> Result<ExportOutcome> {
    let meter = ThroughputMeter::new(total_frames as u64);
    let mut frame_idx: u32 = 0;

    loop {
        if job.cancel.is_cancelled() {
            return Ok(ExportOutcome::Cancelled { frames: frame_idx });
        }
        if total_frames > 0 && frame_idx >= total_frames {
            break;
        }

        job.transition(JobState::Decoding);
        let Some(frame) = source.read_frame()? else {
            break;
        };

        job.transition(JobState::Compositing);
        let annotated = export.compositor.composite(
            &frame,
            export.table.frame(frame_idx),
            frame_idx,
            total_frames,
        );

        job.transition(JobState::Encoding);
        writer
            .write_frame(&annotated)
            .with_context(|| format!("Failed to encode frame {frame_idx}"))?;

        meter.inc();
        frame_idx += 1;

        job.events.publish(PipelineEvent::FileProgress {
            percent: percent(frame_idx, total_frames),
            frame: frame_idx,
            total_frames,
        });
        if frame_idx % TIMING_INTERVAL == 0 {
            job.events.publish(meter.timing_event());
        }
    }

    job.events.publish(meter.timing_event());
    Ok(ExportOutcome::Finished { frames: frame_idx })
}
