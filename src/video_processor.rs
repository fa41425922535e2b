// src/video_processor.rs
//
// Video discovery and the decode/encode boundary.
//
// The pipeline only talks to `MediaBackend`, `FrameSource` and `FrameSink`.
// Frames cross the boundary as RGB `image` buffers; the OpenCV backend
// (feature `opencv`) converts to and from BGR internally.

use anyhow::Result;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use crate::grid::VideoSize;

pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

/// Frame rate used when the container reports none.
pub const FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub size: VideoSize,
    pub fps: f64,
    pub total_frames: u32,
}

impl VideoInfo {
    pub fn effective_fps(&self) -> f64 {
        if self.fps.is_finite() && self.fps > 0.0 {
            self.fps
        } else {
            FALLBACK_FPS
        }
    }
}

pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// Next decoded frame, `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;
}

pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the encoder. Safe to call more than once.
    fn release(&mut self) -> Result<()>;
}

pub trait MediaBackend: Send + Sync {
    /// Dimensions, frame rate and frame count without decoding.
    fn probe(&self, path: &Path) -> Result<VideoInfo>;

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    fn create_writer(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn FrameSink>>;
}

/// Every video under `dir` (recursively), sorted by path.
pub fn find_video_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Input directory {} does not exist", dir.display());
    }

    let mut videos: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_video_file(p))
        .collect();
    videos.sort();

    info!("Found {} video files in {}", videos.len(), dir.display());
    Ok(videos)
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

// ============================================================================
// OPENCV BACKEND
// ============================================================================

#[cfg(feature = "opencv")]
pub use opencv_backend::OpenCvBackend;

#[cfg(feature = "opencv")]
mod opencv_backend {
    use super::{FrameSink, FrameSource, MediaBackend, VideoInfo};
    use crate::grid::VideoSize;
    use anyhow::{Context, Result};
    use image::RgbImage;
    use opencv::{
        core::{self, Mat},
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst, VideoWriter},
    };
    use std::path::Path;
    use tracing::{debug, info};

    #[derive(Debug, Default, Clone, Copy)]
    pub struct OpenCvBackend;

    fn path_str(path: &Path) -> Result<&str> {
        path.to_str()
            .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))
    }

    fn open_capture(path: &Path) -> Result<(VideoCapture, VideoInfo)> {
        let cap = VideoCapture::from_file(path_str(path)?, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            anyhow::bail!("Failed to open video file {}", path.display());
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)?;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)?;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)?;

        let info = VideoInfo {
            size: VideoSize::new(width.max(0.0) as u32, height.max(0.0) as u32),
            fps,
            total_frames: total_frames.max(0.0) as u32,
        };
        debug!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            info.size.width, info.size.height, fps, info.total_frames
        );
        Ok((cap, info))
    }

    impl MediaBackend for OpenCvBackend {
        fn probe(&self, path: &Path) -> Result<VideoInfo> {
            let (mut cap, info) = open_capture(path)?;
            cap.release()?;
            Ok(info)
        }

        fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
            info!("Opening video: {}", path.display());
            let (cap, info) = open_capture(path)?;
            Ok(Box::new(OpenCvReader { cap, info }))
        }

        fn create_writer(
            &self,
            path: &Path,
            width: u32,
            height: u32,
            fps: f64,
        ) -> Result<Box<dyn FrameSink>> {
            let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
            let writer = VideoWriter::new(
                path_str(path)?,
                fourcc,
                fps,
                core::Size::new(width as i32, height as i32),
                true,
            )?;
            if !writer.is_opened()? {
                anyhow::bail!("Could not open video writer for {}", path.display());
            }
            info!("Output video: {}", path.display());
            Ok(Box::new(OpenCvWriter {
                writer,
                released: false,
            }))
        }
    }

    struct OpenCvReader {
        cap: VideoCapture,
        info: VideoInfo,
    }

    impl FrameSource for OpenCvReader {
        fn info(&self) -> VideoInfo {
            self.info
        }

        fn read_frame(&mut self) -> Result<Option<RgbImage>> {
            let mut mat = Mat::default();
            if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
                return Ok(None);
            }

            let mut rgb_mat = Mat::default();
            imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

            let (width, height) = (rgb_mat.cols() as u32, rgb_mat.rows() as u32);
            let data = rgb_mat.data_bytes()?.to_vec();
            let frame = RgbImage::from_raw(width, height, data)
                .context("Decoded frame buffer has an unexpected size")?;
            Ok(Some(frame))
        }
    }

    impl Drop for OpenCvReader {
        fn drop(&mut self) {
            let _ = self.cap.release();
        }
    }

    struct OpenCvWriter {
        writer: VideoWriter,
        released: bool,
    }

    impl FrameSink for OpenCvWriter {
        fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
            use opencv::videoio::VideoWriterTrait;

            let mat = Mat::from_slice(frame.as_raw())?;
            let mat = mat.reshape(3, frame.height() as i32)?;

            let mut bgr_mat = Mat::default();
            imgproc::cvt_color(&mat, &mut bgr_mat, imgproc::COLOR_RGB2BGR, 0)?;
            self.writer.write(&bgr_mat)?;
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            use opencv::videoio::VideoWriterTrait;

            if !self.released {
                self.released = true;
                self.writer.release()?;
            }
            Ok(())
        }
    }

    impl Drop for OpenCvWriter {
        fn drop(&mut self) {
            let _ = self.release();
        }
    }
}

// ============================================================================
// IN-MEMORY BACKEND (tests)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_video_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("day2")).unwrap();
        for name in ["b.mp4", "a.MOV", "notes.txt", "a.csv", "day2/c.mkv"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let videos = find_video_files(dir.path()).unwrap();
        let names: Vec<String> = videos
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.MOV", "b.mp4", "day2/c.mkv"]);
    }

    #[test]
    fn test_missing_input_dir_is_an_error() {
        assert!(find_video_files(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_fps_fallback() {
        let info = VideoInfo {
            size: VideoSize::new(10, 10),
            fps: 0.0,
            total_frames: 5,
        };
        assert_eq!(info.effective_fps(), FALLBACK_FPS);
        let info = VideoInfo { fps: 25.0, ..info };
        assert_eq!(info.effective_fps(), 25.0);
    }
}
