// src/video_processor.rs
//
// Frame sources. A session opens its source once (failing fast if it can't),
// pulls frames until the source runs dry or a stop is requested, then
// releases it.

use crate::error::{EngineError, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Stream metadata reported when a source is opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    /// Nominal frame rate; 0 when the container doesn't say
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// `None` for open-ended feeds
    pub total_frames: Option<u64>,
}

pub trait FrameSource: Send {
    /// Must return `EngineError::SourceUnavailable` when the source can't be read at all.
    fn open(&mut self) -> Result<StreamInfo>;

    /// Next RGB frame in order, `Ok(None)` once exhausted.
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>>;

    fn release(&mut self);

    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<StreamInfo> {
        (**self).open()
    }

    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn find_video_files(input_dir: &Path) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), &VIDEO_EXTENSIONS))
        .map(|e| e.path().to_path_buf())
        .collect();
    videos.sort();

    info!("Found {} video files", videos.len());
    videos
}

/// Image files directly inside `dir`, in name order.
pub fn find_image_files(dir: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), &IMAGE_EXTENSIONS))
        .map(|e| e.path().to_path_buf())
        .collect();
    images.sort();
    images
}

/// Directories under `input_dir` (including itself) that hold still images.
pub fn find_image_sequences(input_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().to_path_buf())
        .filter(|dir| !find_image_files(dir).is_empty())
        .collect()
}

// ============================================================================
// IMAGE SEQUENCE
// ============================================================================

/// A directory of numbered stills played back at a fixed nominal rate.
pub struct ImageSequenceSource {
    dir: PathBuf,
    fps: f64,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn new<P: Into<PathBuf>>(dir: P, fps: f64) -> Self {
        Self {
            dir: dir.into(),
            fps,
            files: Vec::new(),
            cursor: 0,
        }
    }
}

impl FrameSource for ImageSequenceSource {
    fn open(&mut self) -> Result<StreamInfo> {
        if !self.dir.is_dir() {
            return Err(EngineError::source_unavailable(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }

        self.files = find_image_files(&self.dir);
        self.cursor = 0;

        let first = self.files.first().ok_or_else(|| {
            EngineError::source_unavailable(format!("no images in {}", self.dir.display()))
        })?;
        let (width, height) = image::image_dimensions(first).map_err(|e| {
            EngineError::source_unavailable(format!("cannot read {}: {}", first.display(), e))
        })?;

        info!(
            "Image sequence {}: {} frames, {}x{} @ {:.1} FPS",
            self.dir.display(),
            self.files.len(),
            width,
            height,
            self.fps
        );

        Ok(StreamInfo {
            fps: self.fps,
            width,
            height,
            total_frames: Some(self.files.len() as u64),
        })
    }

    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let img = image::open(path)?.to_rgb8();
        Ok(Some(img))
    }

    fn release(&mut self) {
        debug!("Releasing image sequence {}", self.dir.display());
        self.files.clear();
        self.cursor = 0;
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

// ============================================================================
// VIDEO FILE (OpenCV)
// ============================================================================

#[cfg(feature = "video")]
pub use opencv_source::VideoFileSource;

#[cfg(feature = "video")]
mod opencv_source {
    use super::{FrameSource, StreamInfo};
    use crate::error::{EngineError, Result};
    use anyhow::Context;
    use image::RgbImage;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
    };
    use std::path::PathBuf;
    use tracing::{debug, info};

    pub struct VideoFileSource {
        path: PathBuf,
        cap: Option<VideoCapture>,
    }

    impl VideoFileSource {
        pub fn new<P: Into<PathBuf>>(path: P) -> Self {
            Self {
                path: path.into(),
                cap: None,
            }
        }
    }

    impl FrameSource for VideoFileSource {
        fn open(&mut self) -> Result<StreamInfo> {
            info!("Opening video: {}", self.path.display());

            let unavailable = |e: opencv::Error| {
                EngineError::source_unavailable(format!("{}: {}", self.path.display(), e))
            };

            let path_str = self.path.to_string_lossy().to_string();
            let cap = VideoCapture::from_file(&path_str, videoio::CAP_ANY).map_err(unavailable)?;

            if !cap.is_opened().map_err(unavailable)? {
                return Err(EngineError::source_unavailable(format!(
                    "failed to open video file {}",
                    self.path.display()
                )));
            }

            let prop = |id: i32| VideoCaptureTraitConst::get(&cap, id).map_err(unavailable);
            let fps = prop(videoio::CAP_PROP_FPS)?;
            let total_frames = prop(videoio::CAP_PROP_FRAME_COUNT)?;
            let width = prop(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
            let height = prop(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;

            info!(
                "Video properties: {}x{} @ {:.1} FPS, {} frames",
                width, height, fps, total_frames
            );

            self.cap = Some(cap);

            Ok(StreamInfo {
                fps,
                width,
                height,
                total_frames: (total_frames > 0.0).then_some(total_frames as u64),
            })
        }

        fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
            let Some(cap) = self.cap.as_mut() else {
                return Ok(None);
            };

            let mut mat = Mat::default();
            if !VideoCaptureTrait::read(cap, &mut mat)? || mat.empty() {
                return Ok(None);
            }

            let mut rgb_mat = Mat::default();
            imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

            let width = rgb_mat.cols() as u32;
            let height = rgb_mat.rows() as u32;
            let data = rgb_mat.data_bytes()?.to_vec();

            let frame = RgbImage::from_raw(width, height, data)
                .context("decoded frame buffer does not match its dimensions")?;
            Ok(Some(frame))
        }

        fn release(&mut self) {
            if let Some(mut cap) = self.cap.take() {
                if let Err(e) = VideoCaptureTrait::release(&mut cap) {
                    debug!("Release of {} failed: {}", self.path.display(), e);
                }
            }
        }

        fn describe(&self) -> String {
            self.path.display().to_string()
        }
    }
}

// ============================================================================
// ANNOTATED OUTPUT (OpenCV)
// ============================================================================

#[cfg(feature = "video")]
pub use opencv_writer::{annotate, AnnotatedVideoWriter};

#[cfg(feature = "video")]
mod opencv_writer {
    use crate::pipeline::SessionObserver;
    use crate::types::{Frame, ViolationRecord};
    use anyhow::{Context, Result};
    use opencv::{
        core::{self, Mat},
        imgproc,
        prelude::*,
        videoio::{VideoWriter, VideoWriterTrait},
    };
    use std::path::PathBuf;
    use tracing::{debug, info, warn};

    /// Writes every working frame, with its records drawn on, to an MP4.
    /// The file is created on the first frame, sized and timed from it.
    pub struct AnnotatedVideoWriter {
        path: PathBuf,
        writer: Option<VideoWriter>,
        failed: bool,
    }

    impl AnnotatedVideoWriter {
        pub fn new<P: Into<PathBuf>>(path: P) -> Self {
            Self {
                path: path.into(),
                writer: None,
                failed: false,
            }
        }

        fn ensure_open(&mut self, frame: &Frame) -> Result<()> {
            if self.writer.is_some() {
                return Ok(());
            }

            let fps = if frame.timestamp > 0.0 {
                frame.index as f64 / frame.timestamp
            } else {
                30.0
            };
            let (width, height) = frame.image.dimensions();
            let path_str = self
                .path
                .to_str()
                .context("output path is not valid UTF-8")?;

            let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
            let writer = VideoWriter::new(
                path_str,
                fourcc,
                fps,
                core::Size::new(width as i32, height as i32),
                true,
            )?;

            info!("Output video: {}", self.path.display());
            self.writer = Some(writer);
            Ok(())
        }

        fn write_frame(&mut self, frame: &Frame, records: &[ViolationRecord]) -> Result<()> {
            self.ensure_open(frame)?;
            let annotated = annotate(frame, records)?;
            if let Some(writer) = self.writer.as_mut() {
                writer.write(&annotated)?;
            }
            Ok(())
        }
    }

    impl SessionObserver for AnnotatedVideoWriter {
        fn on_frame_image(&mut self, frame: &Frame, records: &[ViolationRecord]) {
            if self.failed {
                return;
            }
            if let Err(e) = self.write_frame(frame, records) {
                warn!(
                    "Annotated output {} disabled at frame {}: {:#}",
                    self.path.display(),
                    frame.index,
                    e
                );
                self.failed = true;
            }
        }
    }

    impl Drop for AnnotatedVideoWriter {
        fn drop(&mut self) {
            if let Some(mut writer) = self.writer.take() {
                if let Err(e) = writer.release() {
                    debug!("Release of {} failed: {}", self.path.display(), e);
                }
            }
        }
    }

    /// BGR copy of the frame with a box per record: red for violations,
    /// green otherwise, plate and speed labels above it.
    pub fn annotate(frame: &Frame, records: &[ViolationRecord]) -> Result<Mat> {
        let height = frame.image.height() as i32;
        let mat = Mat::from_slice(frame.image.as_raw().as_slice())?;
        let mat = mat.reshape(3, height)?;

        let mut bgr_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut bgr_mat, imgproc::COLOR_RGB2BGR, 0)?;

        for record in records {
            let color = if record.is_violation {
                core::Scalar::new(0.0, 0.0, 255.0, 0.0)
            } else {
                core::Scalar::new(0.0, 255.0, 0.0, 0.0)
            };
            let bbox = record.bbox;

            imgproc::rectangle(
                &mut bgr_mat,
                core::Rect::new(bbox.x1, bbox.y1, bbox.width(), bbox.height()),
                color,
                2,
                imgproc::LINE_8,
                0,
            )?;

            if !record.plate_text.is_empty() {
                let text = format!(
                    "Plate: {} ({:.2})",
                    record.plate_text, record.plate_confidence
                );
                put_label(&mut bgr_mat, &text, bbox.x1, bbox.y1 - 40, color)?;
            }
            if let Some(speed) = record.speed_kmh {
                let text = format!("Speed: {:.1} km/h", speed);
                put_label(&mut bgr_mat, &text, bbox.x1, bbox.y1 - 20, color)?;
            }
        }

        Ok(bgr_mat)
    }

    fn put_label(mat: &mut Mat, text: &str, x: i32, y: i32, color: core::Scalar) -> Result<()> {
        imgproc::put_text(
            mat,
            text,
            core::Point::new(x, y.max(12)),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            color,
            2,
            imgproc::LINE_8,
            false,
        )?;
        Ok(())
    }

}
