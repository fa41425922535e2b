// src/pipeline/metrics.rs
//
// Per-file throughput: frames done, rate and time remaining.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::event_bus::PipelineEvent;

#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    pub frames_done: Arc<AtomicU64>,
    pub total_frames: u64,
    pub started_at: Instant,
}

impl ThroughputMeter {
    pub fn new(total_frames: u64) -> Self {
        Self {
            frames_done: Arc::new(AtomicU64::new(0)),
            total_frames,
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self) {
        self.frames_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_done(&self) -> u64 {
        self.frames_done.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Elapsed time, rate and ETA; `remaining` is `None` until the rate is
    /// measurable.
    pub fn timing_event(&self) -> PipelineEvent {
        let elapsed = self.elapsed();
        let done = self.frames_done();
        PipelineEvent::Timing {
            elapsed,
            remaining: remaining_for(done, self.total_frames, elapsed),
            fps: fps_for(done, elapsed),
        }
    }
}

fn fps_for(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.01 {
        frames as f64 / secs
    } else {
        0.0
    }
}

fn remaining_for(done: u64, total: u64, elapsed: Duration) -> Option<Duration> {
    let fps = fps_for(done, elapsed);
    if fps <= 0.0 {
        return None;
    }
    let left = total.saturating_sub(done) as f64;
    Some(Duration::from_secs_f64(left / fps))
}

/// Whole-percent progress for 1-based `frame` out of `total`.
pub fn percent(frame: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    ((frame as u64 * 100 / total as u64).min(100)) as u8
}

/// `HH:MM:SS`, hours not wrapped.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
