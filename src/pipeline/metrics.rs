// src/pipeline/metrics.rs
//
// Session counters. Cheap relaxed atomics so the request layer can read them
// while the frame loop writes; exported as a serializable summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub processed_frames: Arc<AtomicU64>,
    pub detector_calls: Arc<AtomicU64>,
    pub detector_failures: Arc<AtomicU64>,
    pub recognizer_failures: Arc<AtomicU64>,
    pub plates_recognized: Arc<AtomicU64>,
    pub red_light_violations: Arc<AtomicU64>,
    pub speeding_violations: Arc<AtomicU64>,
    pub detector_time_us: Arc<AtomicU64>,
    started_at: Arc<Mutex<Instant>>,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            processed_frames: Arc::new(AtomicU64::new(0)),
            detector_calls: Arc::new(AtomicU64::new(0)),
            detector_failures: Arc::new(AtomicU64::new(0)),
            recognizer_failures: Arc::new(AtomicU64::new(0)),
            plates_recognized: Arc::new(AtomicU64::new(0)),
            red_light_violations: Arc::new(AtomicU64::new(0)),
            speeding_violations: Arc::new(AtomicU64::new(0)),
            detector_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Zero every counter and restart the clock. Shared clones see the reset.
    pub fn reset(&self) {
        for counter in [
            &self.total_frames,
            &self.processed_frames,
            &self.detector_calls,
            &self.detector_failures,
            &self.recognizer_failures,
            &self.plates_recognized,
            &self.red_light_violations,
            &self.speeding_violations,
            &self.detector_time_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.started_at.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    fn elapsed_secs(&self) -> f64 {
        self.started_at
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed()
            .as_secs_f64()
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.elapsed_secs();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            processed_frames: self.processed_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            detector_calls: self.detector_calls.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            recognizer_failures: self.recognizer_failures.load(Ordering::Relaxed),
            plates_recognized: self.plates_recognized.load(Ordering::Relaxed),
            red_light_violations: self.red_light_violations.load(Ordering::Relaxed),
            speeding_violations: self.speeding_violations.load(Ordering::Relaxed),
            last_detector_us: self.detector_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed_secs(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub processed_frames: u64,
    pub fps: f64,
    pub detector_calls: u64,
    pub detector_failures: u64,
    pub recognizer_failures: u64,
    pub plates_recognized: u64,
    pub red_light_violations: u64,
    pub speeding_violations: u64,
    pub last_detector_us: u64,
    pub elapsed_secs: f64,
}
