// src/pipeline/batch.rs
//
// Batch orchestration: one shared grid settings bundle applied to many videos.
//
// Per video, in input order:
//   1. resolve the detection CSV (skip with a warning when there is none)
//   2. parse it and probe the video's pixel size
//   3. rebuild the grid transform for that size
//   4. enrich + segment
//   5. run the selected exporters
//
// A failing (or panicking) video is logged and counted, and the batch moves
// on. Only cancellation or the end of the list stops it. Configuration
// problems are reported before any video is touched.

use ab_glyph::FontArc;
use anyhow::{Context, Result};
use serde::Serialize;
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tracing::debug;

use super::event_bus::{format_log_line, EventSink, LogLevel, PipelineEvent};
use super::export::{run_video_export, ExportOutcome, VideoExport};
use crate::cancel::CancelFlag;
use crate::colors::BehaviorColorMap;
use crate::config::{AppConfig, OutputConfig, SettingsBundle};
use crate::detection_io::{read_detections, resolve_detection_source};
use crate::enrichment::enrich_cancellable;
use crate::error::ConfigError;
use crate::export::{export_centroid_csv, export_enriched_csv, export_tank_workbook};
use crate::grid::CellAssigner;
use crate::render::{export_trajectory_image, resolve_font, CompositorOptions, FrameCompositor};
use crate::segmentation::build_timeline_cancellable;
use crate::video_processor::MediaBackend;

// ============================================================================
// REQUEST / REPORT
// ============================================================================

/// Everything a batch run needs, captured when the batch is launched.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub videos: Vec<PathBuf>,
    pub csv_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub settings: SettingsBundle,
    pub outputs: OutputConfig,
    pub font_path: Option<PathBuf>,
}

impl BatchRequest {
    /// Build a request from the application config, loading the settings bundle.
    pub fn from_config(config: &AppConfig, videos: Vec<PathBuf>) -> Result<Self, ConfigError> {
        let settings = SettingsBundle::load(&config.batch.settings_file)?;
        Ok(Self {
            videos,
            csv_dir: config.batch.csv_dir.as_ref().map(PathBuf::from),
            output_dir: config.output_dir(),
            settings,
            outputs: config.outputs.clone(),
            font_path: config.render.font_path.as_ref().map(PathBuf::from),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;

        if !self.output_dir.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "output directory {} does not exist",
                self.output_dir.display()
            )));
        }
        if !self.outputs.any_selected() {
            return Err(ConfigError::Invalid(
                "no export selected; enable at least one output".into(),
            ));
        }
        if !(self.outputs.time_gap_seconds.is_finite() && self.outputs.time_gap_seconds >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "time_gap_seconds must be a non-negative number (got {})",
                self.outputs.time_gap_seconds
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// Operator log, one entry per line
    pub log: Vec<String>,
}

impl BatchReport {
    /// Write the report as `batch_summary_<timestamp>.json` into `dir`.
    pub fn save_summary(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!(
            "batch_summary_{}.json",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

enum VideoStatus {
    Done,
    Skipped,
    Cancelled,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct BatchOrchestrator {
    backend: Arc<dyn MediaBackend>,
    events: EventSink,
    cancel: CancelFlag,
}

impl BatchOrchestrator {
    pub fn new(backend: Arc<dyn MediaBackend>, events: EventSink, cancel: CancelFlag) -> Self {
        install_panic_trace_hook();
        Self {
            backend,
            events,
            cancel,
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run the whole batch. Only configuration problems return `Err`; every
    /// per-video outcome is folded into the report.
    pub fn run(&self, request: &BatchRequest) -> Result<BatchReport, ConfigError> {
        request.validate()?;

        let font = resolve_font(request.font_path.as_deref())
            .map_err(|e| ConfigError::Invalid(format!("{e:#}")))?;

        let mut report = BatchReport {
            total: request.videos.len(),
            ..Default::default()
        };

        for (idx, video) in request.videos.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }

            let filename = display_name(video);
            self.events.publish(PipelineEvent::OverallProgress {
                index: idx + 1,
                total: request.videos.len(),
                filename: filename.clone(),
            });
            self.events.publish(PipelineEvent::FileProgress {
                percent: 0,
                frame: 0,
                total_frames: 0,
            });

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.process_video(request, &font, video, &mut report)
            }));

            match result {
                Ok(Ok(VideoStatus::Done)) => {
                    report.succeeded += 1;
                    self.events.publish(PipelineEvent::VideoFinished { filename });
                }
                Ok(Ok(VideoStatus::Skipped)) => report.skipped += 1,
                Ok(Ok(VideoStatus::Cancelled)) => break,
                Ok(Err(e)) => {
                    report.failed += 1;
                    // Debug output carries the cause chain and, when enabled, the backtrace
                    self.log(&mut report, LogLevel::Error, format!("Failed to process {filename}: {e:?}"));
                }
                Err(payload) => {
                    report.failed += 1;
                    let mut message =
                        format!("Failed to process {filename}: internal error: {}", panic_message(payload.as_ref()));
                    if let Some(trace) = PANIC_TRACE.with(|t| t.borrow_mut().take()) {
                        message.push_str(&format!("\n{trace}"));
                    }
                    self.log(&mut report, LogLevel::Error, message);
                }
            }
        }

        report.cancelled = self.cancel.is_cancelled();
        if report.cancelled {
            self.log(&mut report, LogLevel::Info, "Batch processing cancelled.");
        } else {
            self.log(&mut report, LogLevel::Info, "Batch processing complete!");
        }
        self.events.publish(PipelineEvent::BatchFinished {
            cancelled: report.cancelled,
        });

        Ok(report)
    }

    fn process_video(
        &self,
        request: &BatchRequest,
        font: &FontArc,
        video: &Path,
        report: &mut BatchReport,
    ) -> Result<VideoStatus> {
        let filename = display_name(video);

        let Some(csv_path) = resolve_detection_source(video, request.csv_dir.as_deref()) else {
            self.log(
                report,
                LogLevel::Warning,
                format!("Skipping '{filename}': Matching CSV file not found."),
            );
            return Ok(VideoStatus::Skipped);
        };
        self.log(
            report,
            LogLevel::Info,
            format!("Found matching detection file: {}", display_name(&csv_path)),
        );

        let (mut table, stats) = read_detections(&csv_path)?;
        if stats.skipped_rows > 0 {
            self.log(
                report,
                LogLevel::Warning,
                format!("{} of {} rows in {} were skipped", stats.skipped_rows, stats.rows, display_name(&csv_path)),
            );
        }

        let info = self
            .backend
            .probe(video)
            .with_context(|| format!("Could not open video: {filename}"))?;

        let grid = request.settings.grid();
        let assigner = CellAssigner::new(&request.settings.pose(), info.size, grid)?;

        if self.cancel.is_cancelled() {
            return Ok(VideoStatus::Cancelled);
        }

        self.log(report, LogLevel::Info, "Assigning detections to tanks based on centroid...");
        let Some(enrich_stats) = enrich_cancellable(&mut table, &assigner, &self.cancel) else {
            return Ok(VideoStatus::Cancelled);
        };
        debug!("{}: {:?}", filename, enrich_stats);

        let Some(timeline) = build_timeline_cancellable(&table, &self.cancel) else {
            return Ok(VideoStatus::Cancelled);
        };
        let colors = BehaviorColorMap::from_table(&table);

        let base = video
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .context("Video path has no file name")?;
        let output = |suffix: &str| request.output_dir.join(format!("{base}{suffix}"));
        let outputs = &request.outputs;
        let num_tanks = grid.num_cells();

        if outputs.enriched_csv {
            let path = output("_with_tanks.csv");
            self.log(report, LogLevel::Info, format!("Saving enriched CSV to: {}", display_name(&path)));
            export_enriched_csv(&table, &path)?;
        }

        if outputs.centroid_csv {
            let path = output("_centroids_wide.csv");
            self.log(report, LogLevel::Info, format!("Saving centroid CSV to: {}", display_name(&path)));
            export_centroid_csv(&table, num_tanks, &path)?;
        }

        if outputs.workbook {
            let path = output("_by_tank.xlsx");
            self.log(report, LogLevel::Info, format!("Saving workbook to: {}", display_name(&path)));
            export_tank_workbook(&table, num_tanks, &path)?;
        }

        if outputs.trajectory_image {
            let path = output("_trajectory.png");
            self.log(report, LogLevel::Info, format!("Saving trajectory image to: {}", display_name(&path)));
            export_trajectory_image(
                &table,
                &assigner,
                info.effective_fps(),
                outputs.time_gap_seconds,
                request.settings.line_thickness,
                &path,
            )?;
        }

        if self.cancel.is_cancelled() {
            return Ok(VideoStatus::Cancelled);
        }

        if outputs.annotated_video {
            let path = output("_annotated.mp4");
            self.log(report, LogLevel::Info, format!("Exporting annotated video to: {}", display_name(&path)));

            let options = CompositorOptions {
                draw_grid: outputs.draw_grid,
                draw_overlays: outputs.draw_overlays,
                line_thickness: request.settings.line_thickness,
                selected_cells: Default::default(),
            };
            let compositor = FrameCompositor::new(&assigner, &colors, &timeline, options, font);
            let export = VideoExport {
                source: video,
                output: &path,
                table: &table,
                compositor: &compositor,
            };

            match run_video_export(self.backend.as_ref(), &export, &self.cancel, &self.events)? {
                ExportOutcome::Finished { .. } => {
                    self.log(report, LogLevel::Info, format!("✓ Finished processing video for: {filename}"));
                }
                ExportOutcome::Cancelled { .. } => return Ok(VideoStatus::Cancelled),
            }
        } else {
            self.events.publish(PipelineEvent::FileProgress {
                percent: 100,
                frame: info.total_frames,
                total_frames: info.total_frames,
            });
            self.log(report, LogLevel::Info, format!("✓ Finished processing data for: {filename}"));
        }

        Ok(VideoStatus::Done)
    }

    fn log(&self, report: &mut BatchReport, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        report.log.push(format_log_line(level, &message));
        match level {
            LogLevel::Info => self.events.info(message),
            LogLevel::Warning => self.events.warn(message),
            LogLevel::Error => self.events.error(message),
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

thread_local! {
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a panic hook that records where a panic happened on this thread, so
/// a panic caught at the video boundary is logged with its stack.
fn install_panic_trace_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let mut trace = match info.location() {
                Some(location) => format!("panicked at {location}"),
                None => "panicked at an unknown location".to_string(),
            };
            let backtrace = Backtrace::capture();
            if backtrace.status() == BacktraceStatus::Captured {
                trace.push_str(&format!("\n{backtrace}"));
            }
            PANIC_TRACE.with(|t| *t.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridConfig, GridPose};
    use crate::pipeline::event_bus::drain;
    use crate::video_processor::testing::MemoryBackend;
    use crate::video_processor::{FrameSink, FrameSource, VideoInfo};
    use std::fs;

    const CSV: &str = "frame_idx,x1,y1,x2,y2,class_name,confidence\n\
                       0,10,10,20,20,swim,0.9\n\
                       1,12,10,22,20,swim,0.9\n\
                       2,14,10,24,20,rest,0.8\n\
                       2,60,30,70,40,swim,0.7\n\
                       4,16,10,26,20,rest,0.8\n";

    struct Workspace {
        dir: tempfile::TempDir,
        out: PathBuf,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            fs::create_dir(&out).unwrap();
            Self { dir, out }
        }

        fn video(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn request(&self, videos: Vec<PathBuf>) -> BatchRequest {
            BatchRequest {
                videos,
                csv_dir: None,
                output_dir: self.out.clone(),
                settings: SettingsBundle::new(GridConfig { cols: 2, rows: 1 }, GridPose::default(), 2),
                outputs: OutputConfig::default(),
                font_path: None,
            }
        }
    }

    #[test]
    fn test_batch_skips_video_without_detections() {
        let ws = Workspace::new();
        let (a, b) = (ws.video("A.mp4"), ws.video("B.mp4"));
        fs::write(ws.video("A.csv"), CSV).unwrap();

        let mut backend = MemoryBackend::new();
        backend.add_video(&a, 100, 50, 10.0, 5);
        backend.add_video(&b, 100, 50, 10.0, 5);
        let shared = Arc::new(backend.clone());

        let (events, mut rx) = EventSink::channel();
        let orchestrator = BatchOrchestrator::new(shared, events, CancelFlag::new());
        let report = orchestrator.run(&ws.request(vec![a.clone(), b.clone()])).unwrap();

        assert_eq!((report.succeeded, report.skipped, report.failed), (1, 1, 0));
        assert!(!report.cancelled);

        let warnings: Vec<&String> = report.log.iter().filter(|l| l.starts_with("[WARNING]")).collect();
        assert_eq!(warnings, vec!["[WARNING] Skipping 'B.mp4': Matching CSV file not found."]);
        assert_eq!(report.log.last().map(String::as_str), Some("Batch processing complete!"));

        for name in [
            "A_with_tanks.csv",
            "A_centroids_wide.csv",
            "A_by_tank.xlsx",
            "A_trajectory.png",
            "A_annotated.mp4",
        ] {
            assert!(ws.out.join(name).is_file(), "{name} missing");
        }
        assert!(!ws.out.join("B_with_tanks.csv").exists());
        assert_eq!(backend.frames_written(&ws.out.join("A_annotated.mp4")), 5);

        // Both tanks of the 2x1 grid got detections
        let enriched = fs::read_to_string(ws.out.join("A_with_tanks.csv")).unwrap();
        assert!(enriched.lines().nth(4).unwrap().contains(",2,65.0000,35.0000"));

        let overall: Vec<(usize, String)> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::OverallProgress { index, filename, .. } => Some((index, filename)),
                _ => None,
            })
            .collect();
        assert_eq!(overall, vec![(1, "A.mp4".to_string()), (2, "B.mp4".to_string())]);
    }

    #[test]
    fn test_failed_video_does_not_stop_batch() {
        let ws = Workspace::new();
        let (broken, good) = (ws.video("broken.mp4"), ws.video("good.mp4"));
        fs::write(ws.video("broken.csv"), CSV).unwrap();
        fs::write(ws.video("good_detections.csv"), CSV).unwrap();

        // broken.mp4 is not registered, so probing it fails
        let mut backend = MemoryBackend::new();
        backend.add_video(&good, 100, 50, 10.0, 5);

        let orchestrator = BatchOrchestrator::new(Arc::new(backend), EventSink::disabled(), CancelFlag::new());
        let report = orchestrator.run(&ws.request(vec![broken, good])).unwrap();

        assert_eq!((report.succeeded, report.skipped, report.failed), (1, 0, 1));
        assert!(report
            .log
            .iter()
            .any(|l| l.starts_with("[ERROR] Failed to process broken.mp4")));
        // Full cause chain, not just the outer context
        assert!(report.log.iter().any(|l| l.contains("Could not open video: broken.mp4") && l.contains("Caused by")));
        assert!(ws.out.join("good_annotated.mp4").is_file());
    }

    struct PanickingBackend;

    impl MediaBackend for PanickingBackend {
        fn probe(&self, _path: &Path) -> Result<VideoInfo> {
            panic!("decoder exploded");
        }

        fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
            unreachable!()
        }

        fn create_writer(&self, _: &Path, _: u32, _: u32, _: f64) -> Result<Box<dyn FrameSink>> {
            unreachable!()
        }
    }

    #[test]
    fn test_panic_is_contained_to_one_video() {
        let ws = Workspace::new();
        fs::write(ws.video("A.csv"), CSV).unwrap();

        let orchestrator =
            BatchOrchestrator::new(Arc::new(PanickingBackend), EventSink::disabled(), CancelFlag::new());
        let report = orchestrator.run(&ws.request(vec![ws.video("A.mp4"), ws.video("B.mp4")])).unwrap();

        assert_eq!((report.succeeded, report.skipped, report.failed), (0, 1, 1));
        let line = report.log.iter().find(|l| l.contains("decoder exploded")).unwrap();
        assert!(line.contains("panicked at src/pipeline/batch.rs"), "{line}");
    }

    #[test]
    fn test_config_errors_reported_before_work() {
        let ws = Workspace::new();
        fs::write(ws.video("A.csv"), CSV).unwrap();
        let mut backend = MemoryBackend::new();
        backend.add_video(&ws.video("A.mp4"), 100, 50, 10.0, 5);
        let orchestrator = BatchOrchestrator::new(Arc::new(backend), EventSink::disabled(), CancelFlag::new());

        let mut request = ws.request(vec![ws.video("A.mp4")]);
        request.outputs = OutputConfig {
            annotated_video: false,
            enriched_csv: false,
            centroid_csv: false,
            workbook: false,
            trajectory_image: false,
            ..OutputConfig::default()
        };
        assert!(matches!(orchestrator.run(&request), Err(ConfigError::Invalid(_))));

        let mut request = ws.request(vec![ws.video("A.mp4")]);
        request.output_dir = ws.dir.path().join("missing");
        assert!(orchestrator.run(&request).is_err());

        let mut request = ws.request(vec![ws.video("A.mp4")]);
        request.settings.grid_transform.scale_x = 0.0;
        assert!(orchestrator.run(&request).is_err());

        let mut request = ws.request(vec![ws.video("A.mp4")]);
        request.font_path = Some(ws.dir.path().join("no_such_font.ttf"));
        assert!(matches!(orchestrator.run(&request), Err(ConfigError::Invalid(_))));

        assert_eq!(fs::read_dir(&ws.out).unwrap().count(), 0);
    }

    #[test]
    fn test_degenerate_grid_fails_video() {
        let ws = Workspace::new();
        fs::write(ws.video("A.csv"), CSV).unwrap();
        let mut backend = MemoryBackend::new();
        // A zero-height video cannot host a grid
        backend.add_video(&ws.video("A.mp4"), 100, 0, 10.0, 5);
        let orchestrator = BatchOrchestrator::new(Arc::new(backend), EventSink::disabled(), CancelFlag::new());

        let report = orchestrator.run(&ws.request(vec![ws.video("A.mp4")])).unwrap();
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_cancelled_batch_stops_early() {
        let ws = Workspace::new();
        fs::write(ws.video("A.csv"), CSV).unwrap();
        let mut backend = MemoryBackend::new();
        backend.add_video(&ws.video("A.mp4"), 100, 50, 10.0, 5);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let (events, mut rx) = EventSink::channel();
        let orchestrator = BatchOrchestrator::new(Arc::new(backend), events, cancel);
        let report = orchestrator.run(&ws.request(vec![ws.video("A.mp4")])).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.succeeded + report.skipped + report.failed, 0);
        assert_eq!(report.log, vec!["Batch processing cancelled.".to_string()]);
        assert!(drain(&mut rx).contains(&PipelineEvent::BatchFinished { cancelled: true }));
        assert_eq!(fs::read_dir(&ws.out).unwrap().count(), 0);
    }

    #[test]
    fn test_request_from_config_loads_settings() {
        let ws = Workspace::new();
        let settings_path = ws.dir.path().join("settings.json");
        SettingsBundle::default().save(&settings_path).unwrap();

        let mut config = AppConfig::default();
        config.batch.settings_file = settings_path.display().to_string();
        config.batch.output_dir = ws.out.display().to_string();
        config.batch.csv_dir = Some("csvs".into());

        let request = BatchRequest::from_config(&config, vec![ws.video("A.mp4")]).unwrap();
        assert_eq!(request.settings, SettingsBundle::default());
        assert_eq!(request.csv_dir, Some(PathBuf::from("csvs")));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_summary_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = BatchReport {
            total: 2,
            succeeded: 1,
            skipped: 1,
            log: vec!["Batch processing complete!".into()],
            ..Default::default()
        };
        let path = report.save_summary(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("batch_summary_") && name.ends_with(".json"));

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["succeeded"], 1);
        assert_eq!(value["log"][0], "Batch processing complete!");
    }
}
