// src/scheduler.rs
//
// Decides which frames pay for the vehicle detector. Signal classification is
// cheap and runs on every frame; detection is the expensive call and is gated
// here. The stride is read fresh on every frame because it can be changed
// through the live settings while a session runs.

/// Policy seam for detector scheduling.
pub trait FrameSkipPolicy: Send {
    fn should_process(&mut self, frame_counter: u64, skip_interval: u32) -> bool;
}

/// Fixed stride: process frame N only when `N % skip_interval == 0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrideScheduler;

impl FrameSkipPolicy for StrideScheduler {
    fn should_process(&mut self, frame_counter: u64, skip_interval: u32) -> bool {
        should_process(frame_counter, skip_interval)
    }
}

/// Intervals below 1 are treated as 1 (no skipping) rather than dividing by zero.
pub fn should_process(frame_counter: u64, skip_interval: u32) -> bool {
    let interval = u64::from(skip_interval.max(1));
    frame_counter % interval == 0
}
