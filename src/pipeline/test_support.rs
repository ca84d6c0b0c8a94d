// src/pipeline/test_support.rs
//
// Doubles for driving sessions without a model or a video file.

use super::session::SessionObserver;
use super::settings::{SettingsUpdate, SharedSettings};
use crate::capability::{PlateRecognizer, VehicleDetector};
use crate::error::{EngineError, Result};
use crate::types::{BBox, Detection, Frame, FrameProgress, PlateReading, VehicleClass, ViolationRecord};
use crate::video_processor::{FrameSource, StreamInfo};
use anyhow::anyhow;
use image::{GrayImage, Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// SOURCES
// ============================================================================

/// Serves `count` identical solid frames.
pub struct SyntheticSource {
    count: u64,
    width: u32,
    height: u32,
    color: Rgb<u8>,
    fps: f64,
    cursor: u64,
    available: bool,
    fail_at: Option<u64>,
    released: Arc<AtomicBool>,
}

impl SyntheticSource {
    pub fn solid(count: u64, color: Rgb<u8>, fps: f64) -> Self {
        Self::solid_sized(count, 640, 480, color, fps)
    }

    pub fn solid_sized(count: u64, width: u32, height: u32, color: Rgb<u8>, fps: f64) -> Self {
        Self {
            count,
            width,
            height,
            color,
            fps,
            cursor: 0,
            available: true,
            fail_at: None,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::solid(0, Rgb([0, 0, 0]), 30.0)
        }
    }

    /// The `n`th read (1-based) returns an error.
    pub fn fail_at(mut self, n: u64) -> Self {
        self.fail_at = Some(n);
        self
    }

    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }

    pub fn was_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<StreamInfo> {
        if !self.available {
            return Err(EngineError::source_unavailable("synthetic source offline"));
        }
        Ok(StreamInfo {
            fps: self.fps,
            width: self.width,
            height: self.height,
            total_frames: Some(self.count),
        })
    }

    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        if self.cursor >= self.count {
            return Ok(None);
        }
        self.cursor += 1;
        if self.fail_at == Some(self.cursor) {
            return Err(anyhow!("corrupt frame {}", self.cursor));
        }
        Ok(Some(RgbImage::from_pixel(self.width, self.height, self.color)))
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "synthetic".to_string()
    }
}

// ============================================================================
// DETECTORS
// ============================================================================

type Script = Box<dyn FnMut(u64) -> Vec<Detection> + Send>;

/// Returns whatever the script yields for a frame index; remembers every call.
pub struct ScriptedDetector {
    script: Script,
    calls: Arc<Mutex<Vec<u64>>>,
    frame_sizes: Vec<(u32, u32)>,
}

impl ScriptedDetector {
    pub fn new<F>(script: F) -> Self
    where
        F: FnMut(u64) -> Vec<Detection> + Send + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
            frame_sizes: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(|_| Vec::new())
    }

    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_log(&self) -> Arc<Mutex<Vec<u64>>> {
        self.calls.clone()
    }

    pub fn frame_sizes(&self) -> &[(u32, u32)] {
        &self.frame_sizes
    }
}

impl VehicleDetector for ScriptedDetector {
    fn detect(&mut self, frame: &Frame, _confidence_threshold: f32) -> anyhow::Result<Vec<Detection>> {
        self.calls.lock().unwrap().push(frame.index);
        self.frame_sizes.push(frame.image.dimensions());
        Ok((self.script)(frame.index))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Fails on frames matching the predicate, otherwise reports one parked car.
pub struct FailingDetector {
    fails_on: Box<dyn Fn(u64) -> bool + Send>,
}

impl FailingDetector {
    pub fn always() -> Self {
        Self::on_frames(|_| true)
    }

    pub fn on_frames<F>(predicate: F) -> Self
    where
        F: Fn(u64) -> bool + Send + 'static,
    {
        Self {
            fails_on: Box::new(predicate),
        }
    }
}

impl VehicleDetector for FailingDetector {
    fn detect(&mut self, frame: &Frame, _confidence_threshold: f32) -> anyhow::Result<Vec<Detection>> {
        if (self.fails_on)(frame.index) {
            return Err(anyhow!("inference backend unavailable"));
        }
        Ok(vec![Detection::new(
            BBox::new(100, 200, 180, 260),
            0.9,
            VehicleClass::Car,
        )])
    }

    fn name(&self) -> &str {
        "failing"
    }
}

// ============================================================================
// RECOGNIZERS
// ============================================================================

pub struct FixedRecognizer {
    reading: PlateReading,
    calls: usize,
    only_binary: bool,
}

impl FixedRecognizer {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            reading: PlateReading {
                text: text.to_string(),
                confidence,
            },
            calls: 0,
            only_binary: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn saw_only_binary_pixels(&self) -> bool {
        self.only_binary
    }
}

impl PlateRecognizer for FixedRecognizer {
    fn recognize(&mut self, plate: &GrayImage) -> anyhow::Result<PlateReading> {
        self.calls += 1;
        if plate.pixels().any(|p| p.0[0] != 0 && p.0[0] != 255) {
            self.only_binary = false;
        }
        Ok(self.reading.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

pub struct FailingRecognizer;

impl PlateRecognizer for FailingRecognizer {
    fn recognize(&mut self, _plate: &GrayImage) -> anyhow::Result<PlateReading> {
        Err(anyhow!("ocr engine crashed"))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

// ============================================================================
// OBSERVER
// ============================================================================

/// Records every event. Can raise a stop flag or push a settings update when
/// a given frame is reported.
#[derive(Default)]
pub struct RecordingObserver {
    violations: Arc<Mutex<Vec<ViolationRecord>>>,
    frames: Arc<Mutex<Vec<FrameProgress>>>,
    stop_at: Option<(u64, Arc<AtomicBool>)>,
    update_at: Option<(u64, SharedSettings, SettingsUpdate)>,
}

impl RecordingObserver {
    pub fn stop_at(mut self, frame_index: u64, stop: Arc<AtomicBool>) -> Self {
        self.stop_at = Some((frame_index, stop));
        self
    }

    pub fn update_at(mut self, frame_index: u64, settings: SharedSettings, update: SettingsUpdate) -> Self {
        self.update_at = Some((frame_index, settings, update));
        self
    }

    pub fn violations(&self) -> Vec<ViolationRecord> {
        self.violations.lock().unwrap().clone()
    }

    pub fn frames(&self) -> Vec<FrameProgress> {
        self.frames.lock().unwrap().clone()
    }

    /// Shared view of the frame log, usable after the observer moved into a worker.
    pub fn frame_log(&self) -> Arc<Mutex<Vec<FrameProgress>>> {
        self.frames.clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_violation(&mut self, record: &ViolationRecord) {
        self.violations.lock().unwrap().push(record.clone());
    }

    fn on_frame(&mut self, progress: &FrameProgress) {
        self.frames.lock().unwrap().push(*progress);

        if let Some((at, stop)) = &self.stop_at {
            if progress.frame_index == *at {
                stop.store(true, Ordering::SeqCst);
            }
        }
        if let Some((at, settings, update)) = &self.update_at {
            if progress.frame_index == *at {
                settings.apply(*update).unwrap();
            }
        }
    }
}
