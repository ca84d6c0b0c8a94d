// src/pipeline/status.rs
//
// Snapshot the request layer polls while a session runs. Folded from the
// session's callbacks under one mutex; every critical section is O(1)
// (counter bumps, one ring push/pop) and no external call is made while the
// lock is held.

use super::session::SessionObserver;
use crate::types::{FrameProgress, SignalStatus, ViolationRecord};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Most recent violations kept in the snapshot.
pub const RECENT_VIOLATIONS_CAPACITY: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct SharedStatus {
    pub current_frame: u64,
    pub total_violations: u64,
    pub detections_count: usize,
    /// Oldest first, at most `RECENT_VIOLATIONS_CAPACITY`
    pub last_violations: VecDeque<ViolationRecord>,
    /// Sample time (s) of the last reported frame
    pub timestamp: Option<f64>,
    pub last_signal: Option<SignalStatus>,
    pub running: bool,
    /// Processing throughput of the current run
    pub frames_per_second: f64,
    #[serde(skip)]
    started_at: Option<Instant>,
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self {
            current_frame: 0,
            total_violations: 0,
            detections_count: 0,
            last_violations: VecDeque::with_capacity(RECENT_VIOLATIONS_CAPACITY),
            timestamp: None,
            last_signal: None,
            running: false,
            frames_per_second: 0.0,
            started_at: None,
        }
    }
}

impl SharedStatus {
    fn push_violation(&mut self, record: ViolationRecord) {
        if self.last_violations.len() >= RECENT_VIOLATIONS_CAPACITY {
            self.last_violations.pop_front();
        }
        self.last_violations.push_back(record);
        self.total_violations += 1;
    }

    fn apply_progress(&mut self, progress: &FrameProgress) {
        self.current_frame = progress.frame_index;
        self.detections_count = progress.detections_count;
        self.timestamp = Some(progress.timestamp);
        self.last_signal = Some(progress.signal_status);

        if let Some(started) = self.started_at {
            let elapsed = started.elapsed().as_secs_f64();
            if elapsed > 0.01 {
                self.frames_per_second = progress.frame_index as f64 / elapsed;
            }
        }
    }
}

/// Cloneable handle to the lock-protected status.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<SharedStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SharedStatus> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> SharedStatus {
        self.lock().clone()
    }

    /// Clear everything for a fresh run and mark it running.
    pub fn begin_session(&self) {
        let mut status = self.lock();
        *status = SharedStatus::default();
        status.running = true;
        status.started_at = Some(Instant::now());
    }

    pub fn end_session(&self) {
        self.lock().running = false;
    }

    pub fn record_violation(&self, record: &ViolationRecord) {
        if !record.is_violation {
            return;
        }
        let record = record.clone();
        self.lock().push_violation(record);
    }

    pub fn record_frame(&self, progress: &FrameProgress) {
        self.lock().apply_progress(progress);
    }
}

impl SessionObserver for StatusBoard {
    fn on_violation(&mut self, record: &ViolationRecord) {
        self.record_violation(record);
    }

    fn on_frame(&mut self, progress: &FrameProgress) {
        self.record_frame(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BBox, VehicleClass, ViolationType};

    fn violation(frame_index: u64) -> ViolationRecord {
        ViolationRecord {
            frame_index,
            bbox: BBox::new(0, 0, 10, 10),
            vehicle_class: VehicleClass::Car,
            plate_text: format!("ABC{}", frame_index),
            plate_confidence: 0.85,
            speed_kmh: Some(80.0),
            is_violation: true,
            violation_type: ViolationType::Speeding,
            signal_status: SignalStatus::Green,
            signal_confidence: 0.9,
        }
    }

    #[test]
    fn test_recent_violations_bounded_fifo() {
        let board = StatusBoard::new();
        board.begin_session();

        for i in 1..=10 {
            board.record_violation(&violation(i));
        }
        assert_eq!(board.snapshot().last_violations.len(), 10);

        board.record_violation(&violation(11));
        let status = board.snapshot();
        assert_eq!(status.last_violations.len(), 10);
        assert_eq!(status.total_violations, 11);
        assert!(status.last_violations.iter().all(|v| v.frame_index != 1));
        assert_eq!(status.last_violations.front().unwrap().frame_index, 2);
        assert_eq!(status.last_violations.back().unwrap().frame_index, 11);
    }

    #[test]
    fn test_bound_holds_for_long_runs() {
        let board = StatusBoard::new();
        for i in 1..=500 {
            board.record_violation(&violation(i));
            assert!(board.snapshot().last_violations.len() <= RECENT_VIOLATIONS_CAPACITY);
        }
    }

    #[test]
    fn test_non_violations_not_recorded() {
        let board = StatusBoard::new();
        let mut record = violation(3);
        record.is_violation = false;
        record.violation_type = ViolationType::None;
        board.record_violation(&record);
        let status = board.snapshot();
        assert_eq!(status.total_violations, 0);
        assert!(status.last_violations.is_empty());
    }

    #[test]
    fn test_frame_progress_updates_snapshot() {
        let board = StatusBoard::new();
        board.begin_session();
        board.record_frame(&FrameProgress {
            frame_index: 42,
            detections_count: 3,
            violations_so_far: 1,
            timestamp: 1.4,
            signal_status: SignalStatus::Red,
        });
        let status = board.snapshot();
        assert!(status.running);
        assert_eq!(status.current_frame, 42);
        assert_eq!(status.detections_count, 3);
        assert_eq!(status.timestamp, Some(1.4));
        assert_eq!(status.last_signal, Some(SignalStatus::Red));
    }

    #[test]
    fn test_begin_session_resets() {
        let board = StatusBoard::new();
        board.record_violation(&violation(1));
        board.begin_session();
        let status = board.snapshot();
        assert_eq!(status.total_violations, 0);
        assert!(status.last_violations.is_empty());
        board.end_session();
        assert!(!board.snapshot().running);
    }
}
