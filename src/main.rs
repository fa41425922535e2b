// src/main.rs

use anyhow::Result;
use clap::Parser;
use ethogrid::config::AppConfig;
use ethogrid::pipeline::metrics::format_hms;
use ethogrid::pipeline::{BatchOrchestrator, BatchRequest, EventSink, PipelineEvent};
use ethogrid::video_processor::{find_video_files, OpenCvBackend};
use ethogrid::CancelFlag;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Batch tank assignment and annotated export for detection CSVs.
#[derive(Debug, Parser)]
#[command(name = "ethogrid", version, about)]
struct Args {
    /// Application config (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Videos to process; defaults to every video under `batch.input_dir`
    videos: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🐟 EthoGrid batch export starting");
    info!("✓ Configuration loaded from {}", args.config.display());

    let videos = if args.videos.is_empty() {
        find_video_files(Path::new(&config.batch.input_dir))?
    } else {
        args.videos
    };
    if videos.is_empty() {
        error!("No video files found in {}", config.batch.input_dir);
        return Ok(());
    }
    info!("Found {} video file(s) to process", videos.len());

    let request = BatchRequest::from_config(&config, videos)?;
    info!(
        "✓ Grid settings: {}x{} tanks, line thickness {}",
        request.settings.grid_settings.cols,
        request.settings.grid_settings.rows,
        request.settings.line_thickness
    );

    let (events, mut rx) = EventSink::channel();
    let cancel = CancelFlag::new();
    let orchestrator = BatchOrchestrator::new(Arc::new(OpenCvBackend), events, cancel.clone());
    let output_dir = request.output_dir.clone();

    let mut job = tokio::task::spawn_blocking(move || orchestrator.run(&request));
    let mut progress = ProgressLog::default();

    let report = loop {
        tokio::select! {
            result = &mut job => break result??,
            Some(event) = rx.recv() => progress.handle(event),
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                warn!("⚠️  Stopping batch process...");
                cancel.cancel();
            }
        }
    };
    while let Ok(event) = rx.try_recv() {
        progress.handle(event);
    }

    info!("\n========================================");
    info!("  Videos: {}", report.total);
    info!("  ✅ Succeeded: {}", report.succeeded);
    info!("  ⏭️  Skipped: {}", report.skipped);
    info!("  ❌ Failed: {}", report.failed);
    if report.cancelled {
        info!("  🛑 Cancelled before the end of the list");
    }
    info!("========================================");

    match report.save_summary(&output_dir) {
        Ok(path) => info!("💾 Batch summary saved to {}", path.display()),
        Err(e) => warn!("⚠️  Could not save batch summary: {:#}", e),
    }

    Ok(())
}

/// Turns progress events into log lines; log events are already mirrored to
/// `tracing` by the sink.
#[derive(Default)]
struct ProgressLog {
    last_decile: Option<u8>,
}

impl ProgressLog {
    fn handle(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::OverallProgress {
                index,
                total,
                filename,
            } => {
                self.last_decile = None;
                info!("🎬 Processing video {}/{}: {}", index, total, filename);
            }
            PipelineEvent::FileProgress {
                percent,
                frame,
                total_frames,
            } => {
                let decile = percent / 10;
                if frame > 0 && self.last_decile != Some(decile) {
                    self.last_decile = Some(decile);
                    info!("  {:>3}% ({}/{} frames)", percent, frame, total_frames);
                }
            }
            PipelineEvent::Timing {
                elapsed,
                remaining,
                fps,
            } => {
                debug!(
                    "Elapsed {} | ETR {} | {:.1} FPS",
                    format_hms(elapsed),
                    remaining.map(format_hms).unwrap_or_else(|| "--:--:--".into()),
                    fps
                );
            }
            PipelineEvent::VideoFinished { filename } => debug!("Video done: {}", filename),
            PipelineEvent::BatchFinished { cancelled } => debug!("Batch finished (cancelled: {})", cancelled),
            PipelineEvent::Log { .. } => {}
        }
    }
}
