// src/pipeline/interactive.rs
//
// Background enrichment + segmentation for an interactive session.
//
// Replace, don't queue: submitting a new snapshot cancels the running job and
// waits for it to wind down before the replacement starts. Results carry the
// generation they were computed for, so a consumer can ignore anything older
// than its latest submission. A cancelled job sends nothing.

use anyhow::Result;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancel::CancelFlag;
use crate::enrichment::{enrich_cancellable, EnrichStats};
use crate::grid::{CellAssigner, GridConfig, GridPose, VideoSize};
use crate::segmentation::build_timeline_cancellable;
use crate::types::{DetectionTable, TimelineSegments};

/// Inputs of one job, captured at submission time.
#[derive(Debug, Clone)]
pub struct DetectionSnapshot {
    pub table: DetectionTable,
    pub pose: GridPose,
    pub grid: GridConfig,
    pub size: VideoSize,
}

#[derive(Debug)]
pub enum JobUpdate {
    Finished {
        generation: u64,
        table: DetectionTable,
        timeline: TimelineSegments,
        stats: EnrichStats,
    },
    Failed {
        generation: u64,
        message: String,
    },
}

impl JobUpdate {
    pub fn generation(&self) -> u64 {
        match self {
            JobUpdate::Finished { generation, .. } | JobUpdate::Failed { generation, .. } => {
                *generation
            }
        }
    }
}

/// Enrich and segment a snapshot. `Ok(None)` when cancelled.
pub fn process_snapshot(
    snapshot: DetectionSnapshot,
    cancel: &CancelFlag,
) -> Result<Option<(DetectionTable, TimelineSegments, EnrichStats)>> {
    let DetectionSnapshot {
        mut table,
        pose,
        grid,
        size,
    } = snapshot;

    let assigner = CellAssigner::new(&pose, size, grid)?;

    let Some(stats) = enrich_cancellable(&mut table, &assigner, cancel) else {
        return Ok(None);
    };
    let Some(timeline) = build_timeline_cancellable(&table, cancel) else {
        return Ok(None);
    };

    Ok(Some((table, timeline, stats)))
}

struct RunningJob {
    generation: u64,
    cancel: CancelFlag,
    handle: JoinHandle<()>,
}

pub struct DetectionJobRunner {
    updates: UnboundedSender<JobUpdate>,
    current: Option<RunningJob>,
    generation: u64,
}

impl DetectionJobRunner {
    pub fn new() -> (Self, UnboundedReceiver<JobUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                updates,
                current: None,
                generation: 0,
            },
            rx,
        )
    }

    /// Start processing `snapshot`, replacing any running job.
    /// Returns the generation number of the new job.
    pub async fn submit(&mut self, snapshot: DetectionSnapshot) -> u64 {
        self.cancel_current().await;

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancelFlag::new();
        let job_cancel = cancel.clone();
        let updates = self.updates.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| process_snapshot(snapshot, &job_cancel)));

            let update = match result {
                Ok(Ok(Some((table, timeline, stats)))) => JobUpdate::Finished {
                    generation,
                    table,
                    timeline,
                    stats,
                },
                Ok(Ok(None)) => {
                    debug!("Detection job {} cancelled", generation);
                    return;
                }
                Ok(Err(e)) => JobUpdate::Failed {
                    generation,
                    message: format!("Error during detection processing: {e:#}"),
                },
                Err(_) => JobUpdate::Failed {
                    generation,
                    message: "Error during detection processing: internal error".to_string(),
                },
            };

            if job_cancel.is_cancelled() {
                debug!("Detection job {} cancelled after finishing", generation);
                return;
            }
            if let JobUpdate::Failed { message, .. } = &update {
                warn!("⚠️  {}", message);
            }
            let _ = updates.send(update);
        });

        self.current = Some(RunningJob {
            generation,
            cancel,
            handle,
        });
        generation
    }

    /// Cancel the running job, if any, and wait until it has stopped.
    pub async fn cancel_current(&mut self) {
        if let Some(job) = self.current.take() {
            job.cancel.cancel();
            if let Err(e) = job.handle.await {
                warn!("⚠️  Detection job {} ended abnormally: {}", job.generation, e);
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for DetectionJobRunner {
    /// A dropped runner cannot deliver results; stop its job at the next poll.
    fn drop(&mut self) {
        if let Some(job) = &self.current {
            job.cancel.cancel();
        }
    }
}
