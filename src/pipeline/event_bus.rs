// src/pipeline/event_bus.rs
//
// Progress and log events from background jobs.
//
// Workers publish and move on: the channel is unbounded and a closed or
// missing receiver is ignored. Log events are mirrored to `tracing` so a
// headless run loses nothing when no one drains the channel.

use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Log {
        level: LogLevel,
        message: String,
    },

    /// A new video started; `index` is 1-based.
    OverallProgress {
        index: usize,
        total: usize,
        filename: String,
    },

    /// Export progress within the current video; `frame` is 1-based.
    FileProgress {
        percent: u8,
        frame: u32,
        total_frames: u32,
    },

    Timing {
        elapsed: Duration,
        remaining: Option<Duration>,
        fps: f64,
    },

    VideoFinished {
        filename: String,
    },

    BatchFinished {
        cancelled: bool,
    },
}

impl PipelineEvent {
    /// Log line as shown to an operator, `None` for non-log events.
    pub fn log_line(&self) -> Option<String> {
        match self {
            PipelineEvent::Log { level, message } => Some(format_log_line(*level, message)),
            _ => None,
        }
    }
}

pub fn format_log_line(level: LogLevel, message: &str) -> String {
    match level {
        LogLevel::Info => message.to_string(),
        LogLevel::Warning => format!("[WARNING] {message}"),
        LogLevel::Error => format!("[ERROR] {message}"),
    }
}

/// Sending half handed to jobs. Cloning is cheap; all clones feed one receiver.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that only mirrors logs to `tracing`.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening any more
            let _ = tx.send(event);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.publish(PipelineEvent::Log {
            level: LogLevel::Info,
            message,
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("⚠️  {}", message);
        self.publish(PipelineEvent::Log {
            level: LogLevel::Warning,
            message,
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("❌ {}", message);
        self.publish(PipelineEvent::Log {
            level: LogLevel::Error,
            message,
        });
    }
}

/// Drain everything currently queued without waiting.
pub fn drain(rx: &mut UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
