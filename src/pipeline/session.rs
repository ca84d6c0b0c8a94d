// src/pipeline/session.rs
//
// One pass over one frame source.
//
//   Idle --run--> Running --stop flag--> Stopped
//                         --source dry--> Exhausted
//
// Per frame: resize to the working resolution, classify the signal (every
// frame), then, only on frames the skip policy selects, detect vehicles, read
// plates, estimate motion against the previous processed frame and classify
// each detection. Capability failures are logged and treated as "nothing
// found"; they never end the session. The stop flag is honoured at iteration
// boundaries, so at most one extra frame is processed after a stop request.

use super::metrics::SessionMetrics;
use super::settings::SharedSettings;
use crate::capability::{binarize_plate, plate_region, PlateRecognizer, VehicleDetector};
use crate::error::{EngineError, Result};
use crate::scheduler::{FrameSkipPolicy, StrideScheduler};
use crate::signal_classifier::classify_signal;
use crate::tracker::{CentroidTracker, MotionEstimator, TrackMatch};
use crate::types::{
    Detection, Frame, FrameProgress, PlateReading, RunSummary, SessionState, SignalState,
    ViolationRecord, ViolationType, SUMMARY_VIOLATION_LIMIT,
};
use crate::video_processor::FrameSource;
use crate::violation::classify_violation;
use image::{imageops::FilterType, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Working resolution every frame is resized to before analysis.
pub const WORK_WIDTH: u32 = 640;
pub const WORK_HEIGHT: u32 = 480;

const PROGRESS_LOG_INTERVAL: u64 = 100;
const DEFAULT_FALLBACK_FPS: f64 = 30.0;

/// Receives session events synchronously, on the session's thread.
pub trait SessionObserver: Send {
    /// Called for every classified detection, violation or not.
    fn on_violation(&mut self, _record: &ViolationRecord) {}

    /// Called once per frame with the working-resolution image and the
    /// records produced on it (empty on skipped frames). Runs before
    /// `on_frame`.
    fn on_frame_image(&mut self, _frame: &Frame, _records: &[ViolationRecord]) {}

    /// Called once per frame, processed or skipped.
    fn on_frame(&mut self, _progress: &FrameProgress) {}
}

impl<T: SessionObserver + ?Sized> SessionObserver for Box<T> {
    fn on_violation(&mut self, record: &ViolationRecord) {
        (**self).on_violation(record)
    }

    fn on_frame_image(&mut self, frame: &Frame, records: &[ViolationRecord]) {
        (**self).on_frame_image(frame, records)
    }

    fn on_frame(&mut self, progress: &FrameProgress) {
        (**self).on_frame(progress)
    }
}

/// Fan-out: every observer sees every event, in order.
impl<T: SessionObserver> SessionObserver for Vec<T> {
    fn on_violation(&mut self, record: &ViolationRecord) {
        for observer in self.iter_mut() {
            observer.on_violation(record);
        }
    }

    fn on_frame_image(&mut self, frame: &Frame, records: &[ViolationRecord]) {
        for observer in self.iter_mut() {
            observer.on_frame_image(frame, records);
        }
    }

    fn on_frame(&mut self, progress: &FrameProgress) {
        for observer in self.iter_mut() {
            observer.on_frame(progress);
        }
    }
}

pub struct StreamSession<'a> {
    detector: &'a mut dyn VehicleDetector,
    recognizer: &'a mut dyn PlateRecognizer,
    tracker: Box<dyn MotionEstimator + 'a>,
    scheduler: Box<dyn FrameSkipPolicy + 'a>,
    observers: Vec<&'a mut dyn SessionObserver>,
    settings: SharedSettings,
    stop: Arc<AtomicBool>,
    metrics: SessionMetrics,
    fallback_fps: f64,
    state: SessionState,
}

impl<'a> StreamSession<'a> {
    pub fn new(
        detector: &'a mut dyn VehicleDetector,
        recognizer: &'a mut dyn PlateRecognizer,
        settings: SharedSettings,
    ) -> Self {
        Self {
            detector,
            recognizer,
            tracker: Box::new(CentroidTracker::new()),
            scheduler: Box::new(StrideScheduler),
            observers: Vec::new(),
            settings,
            stop: Arc::new(AtomicBool::new(false)),
            metrics: SessionMetrics::new(),
            fallback_fps: DEFAULT_FALLBACK_FPS,
            state: SessionState::Idle,
        }
    }

    pub fn with_tracker(mut self, tracker: Box<dyn MotionEstimator + 'a>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Box<dyn FrameSkipPolicy + 'a>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_observer(mut self, observer: &'a mut dyn SessionObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_metrics(mut self, metrics: SessionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Frame rate assumed when the source reports none.
    pub fn with_fallback_fps(mut self, fps: f64) -> Self {
        self.fallback_fps = fps;
        self
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to a terminal state. Fails only when the source
    /// cannot be opened; the source is released on every other path.
    pub fn run(mut self, source: &mut dyn FrameSource) -> Result<RunSummary> {
        let info = source.open()?;

        let fps = if info.fps.is_finite() && info.fps > 0.0 {
            info.fps
        } else {
            warn!(
                "{} reports no frame rate, assuming {:.1} FPS",
                source.describe(),
                self.fallback_fps
            );
            self.fallback_fps
        };

        info!(
            "▶️  Session started on {} ({}x{} @ {:.1} FPS, detector: {}, recognizer: {}, tracker: {})",
            source.describe(),
            info.width,
            info.height,
            fps,
            self.detector.name(),
            self.recognizer.name(),
            self.tracker.name()
        );

        self.state = SessionState::Running;
        let started = Instant::now();

        let mut frame_counter: u64 = 0;
        let mut violation_count: usize = 0;
        let mut violation_list: Vec<ViolationRecord> = Vec::new();
        let mut previous: Vec<Detection> = Vec::new();
        let mut frames_since_detection: u64 = 0;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!("⏹️  Stop requested after frame {}", frame_counter);
                self.state = SessionState::Stopped;
                break;
            }

            let raw = match source.next_frame() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    self.state = SessionState::Exhausted;
                    break;
                }
                Err(e) => {
                    error!(
                        "Read error after frame {} on {}: {:#}, ending session",
                        frame_counter,
                        source.describe(),
                        e
                    );
                    self.state = SessionState::Exhausted;
                    break;
                }
            };

            frame_counter += 1;
            frames_since_detection += 1;
            self.metrics.inc(&self.metrics.total_frames);

            let settings = self.settings.snapshot();
            let frame = Frame {
                image: to_working_resolution(raw),
                index: frame_counter,
                timestamp: frame_counter as f64 / fps,
            };

            let signal = classify_signal(&frame.image);
            let mut detections_count = 0;
            let mut frame_records: Vec<ViolationRecord> = Vec::new();

            if self.scheduler.should_process(frame_counter, settings.frame_skip) {
                self.metrics.inc(&self.metrics.processed_frames);

                let detections = self.detect(&frame, settings.confidence_threshold);
                detections_count = detections.len();

                // Displacement is measured across the frames skipped since the
                // last detector run.
                let tracker_fps = fps / frames_since_detection as f64;
                frames_since_detection = 0;

                let matches = self
                    .tracker
                    .match_and_estimate(&previous, &detections, tracker_fps);

                for track in &matches {
                    let record = self.evaluate(&frame, &signal, track, settings.speed_limit);

                    for observer in self.observers.iter_mut() {
                        observer.on_violation(&record);
                    }

                    if record.is_violation {
                        violation_count += 1;
                        self.count_violation(&record);
                        if violation_list.len() < SUMMARY_VIOLATION_LIMIT {
                            violation_list.push(record.clone());
                        }
                    }
                    frame_records.push(record);
                }

                previous = detections;
            }

            for observer in self.observers.iter_mut() {
                observer.on_frame_image(&frame, &frame_records);
            }

            let progress = FrameProgress {
                frame_index: frame_counter,
                detections_count,
                violations_so_far: violation_count,
                timestamp: frame.timestamp,
                signal_status: signal.status,
            };
            for observer in self.observers.iter_mut() {
                observer.on_frame(&progress);
            }

            if frame_counter % PROGRESS_LOG_INTERVAL == 0 {
                info!(
                    "Progress: frame {} ({:.1}s), {} violations, signal {}",
                    frame_counter,
                    frame.timestamp,
                    violation_count,
                    signal.status.as_str()
                );
            }
        }

        source.release();

        let elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            "✓ Session {:?}: {} frames in {:.1}s, {} violations",
            self.state, frame_counter, elapsed_secs, violation_count
        );

        Ok(RunSummary {
            total_frames: frame_counter,
            fps,
            violation_count,
            violation_list,
            final_state: self.state,
            elapsed_secs,
        })
    }

    /// Detector output above the live threshold, highest confidence first.
    /// A failing detector yields no detections for this frame.
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Vec<Detection> {
        self.metrics.inc(&self.metrics.detector_calls);
        let t0 = Instant::now();

        let result = self.detector.detect(frame, confidence_threshold);
        self.metrics.set_timing(
            &self.metrics.detector_time_us,
            t0.elapsed().as_micros() as u64,
        );

        let mut detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                self.metrics.inc(&self.metrics.detector_failures);
                warn!("{}", EngineError::capability("detector", frame.index, &e));
                return Vec::new();
            }
        };

        detections.retain(|d| d.confidence >= confidence_threshold);
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections
    }

    fn read_plate(&mut self, frame: &Frame, detection: &Detection) -> PlateReading {
        let Some(region) = plate_region(&frame.image, &detection.bbox) else {
            return PlateReading::empty();
        };
        let binary = binarize_plate(&region);

        match self.recognizer.recognize(&binary) {
            Ok(reading) => {
                if reading.is_legible() {
                    self.metrics.inc(&self.metrics.plates_recognized);
                }
                reading
            }
            Err(e) => {
                self.metrics.inc(&self.metrics.recognizer_failures);
                warn!("{}", EngineError::capability("recognizer", frame.index, &e));
                PlateReading::empty()
            }
        }
    }

    fn evaluate(
        &mut self,
        frame: &Frame,
        signal: &SignalState,
        track: &TrackMatch,
        speed_limit: f64,
    ) -> ViolationRecord {
        let detection = &track.current;
        let plate = self.read_plate(frame, detection);
        let verdict = classify_violation(signal, track.speed_kmh, speed_limit);

        let record = ViolationRecord {
            frame_index: frame.index,
            bbox: detection.bbox,
            vehicle_class: detection.class,
            plate_text: plate.text,
            plate_confidence: plate.confidence,
            speed_kmh: track.speed_kmh,
            is_violation: verdict.is_violation,
            violation_type: verdict.violation_type,
            signal_status: signal.status,
            signal_confidence: signal.confidence,
        };

        if record.is_violation {
            warn!(
                "🚨 {:?} at frame {}: {} plate='{}' speed={} signal={} ({:.2})",
                record.violation_type,
                record.frame_index,
                record.vehicle_class.as_str(),
                record.plate_text,
                record
                    .speed_kmh
                    .map(|s| format!("{:.1} km/h", s))
                    .unwrap_or_else(|| "n/a".to_string()),
                record.signal_status.as_str(),
                record.signal_confidence
            );
        }

        record
    }

    fn count_violation(&self, record: &ViolationRecord) {
        match record.violation_type {
            ViolationType::RedLight => self.metrics.inc(&self.metrics.red_light_violations),
            ViolationType::Speeding => self.metrics.inc(&self.metrics.speeding_violations),
            ViolationType::None => {}
        }
    }
}

fn to_working_resolution(image: RgbImage) -> RgbImage {
    if image.dimensions() == (WORK_WIDTH, WORK_HEIGHT) {
        image
    } else {
        image::imageops::resize(&image, WORK_WIDTH, WORK_HEIGHT, FilterType::Triangle)
    }
}
