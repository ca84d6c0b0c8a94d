// src/tracker.rs
//
// Frame-to-frame nearest-centroid association used only for motion/speed
// estimation. There is no persistent track identity: each frame's detections
// are matched against the previous processed frame's set by proximity.
//
// The speed figure is an APPROXIMATION. Pixels are converted to metres with a
// fixed, uncalibrated constant (10 px/m) and no perspective correction, so the
// result is only meaningful as a relative indicator of motion.
//
// Greedy O(|current| x |previous|) scan; fine for the low tens of vehicles per
// frame this sees.

use crate::types::Detection;
use tracing::debug;

/// Maximum centroid displacement (px) accepted as the same vehicle.
pub const MATCH_RADIUS_PX: f32 = 100.0;
/// Uncalibrated pixel-to-metre scale.
pub const PIXELS_PER_METER: f64 = 10.0;
/// Estimates are clamped to [0, MAX_SPEED_KMH].
pub const MAX_SPEED_KMH: f64 = 120.0;

const MS_TO_KMH: f64 = 3.6;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackMatch {
    pub current: Detection,
    /// Closest previous-frame detection, if within `MATCH_RADIUS_PX`
    pub previous: Option<Detection>,
    /// Distance to the closest previous centroid (infinite when there was none)
    pub pixel_distance: f32,
    /// Present only when `previous` is
    pub speed_kmh: Option<f64>,
}

/// Strategy seam for motion estimation. One result per current detection, in
/// the same order.
pub trait MotionEstimator: Send {
    fn match_and_estimate(
        &self,
        previous: &[Detection],
        current: &[Detection],
        fps: f64,
    ) -> Vec<TrackMatch>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct CentroidTracker {
    match_radius_px: f32,
    pixels_per_meter: f64,
    max_speed_kmh: f64,
}

impl Default for CentroidTracker {
    fn default() -> Self {
        Self {
            match_radius_px: MATCH_RADIUS_PX,
            pixels_per_meter: PIXELS_PER_METER,
            max_speed_kmh: MAX_SPEED_KMH,
        }
    }
}

impl CentroidTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index and distance of the previous detection closest to `current`.
    fn nearest(&self, previous: &[Detection], current: &Detection) -> Option<(usize, f32)> {
        let (cx, cy) = current.bbox.centroid();
        let mut best: Option<(usize, f32)> = None;

        for (idx, prev) in previous.iter().enumerate() {
            let (px, py) = prev.bbox.centroid();
            let dist = ((cx - px).powi(2) + (cy - py).powi(2)).sqrt();
            match best {
                Some((_, d)) if d <= dist => {}
                _ => best = Some((idx, dist)),
            }
        }

        best
    }

    pub fn estimate_speed_kmh(&self, distance_px: f32, fps: f64) -> f64 {
        let distance_m = distance_px as f64 / self.pixels_per_meter;
        let speed = distance_m * fps * MS_TO_KMH;
        speed.clamp(0.0, self.max_speed_kmh)
    }
}

impl MotionEstimator for CentroidTracker {
    fn match_and_estimate(
        &self,
        previous: &[Detection],
        current: &[Detection],
        fps: f64,
    ) -> Vec<TrackMatch> {
        current
            .iter()
            .map(|det| match self.nearest(previous, det) {
                Some((idx, dist)) if dist < self.match_radius_px => {
                    let speed = self.estimate_speed_kmh(dist, fps);
                    debug!(
                        "Matched {} at ({:.0},{:.0}): {:.1}px -> {:.1} km/h",
                        det.class.as_str(),
                        det.bbox.centroid().0,
                        det.bbox.centroid().1,
                        dist,
                        speed
                    );
                    TrackMatch {
                        current: det.clone(),
                        previous: Some(previous[idx].clone()),
                        pixel_distance: dist,
                        speed_kmh: Some(speed),
                    }
                }
                nearest => TrackMatch {
                    current: det.clone(),
                    previous: None,
                    pixel_distance: nearest.map(|(_, d)| d).unwrap_or(f32::INFINITY),
                    speed_kmh: None,
                },
            })
            .collect()
    }

    fn name(&self) -> &str {
        "nearest-centroid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BBox, VehicleClass};

    fn det_at(cx: i32, cy: i32) -> Detection {
        Detection::new(
            BBox::new(cx - 20, cy - 10, cx + 20, cy + 10),
            0.9,
            VehicleClass::Car,
        )
    }

    #[test]
    fn test_zero_displacement_is_zero_speed() {
        let tracker = CentroidTracker::new();
        let matches = tracker.match_and_estimate(&[det_at(100, 100)], &[det_at(100, 100)], 30.0);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].previous.is_some());
        assert_eq!(matches[0].pixel_distance, 0.0);
        assert_eq!(matches[0].speed_kmh, Some(0.0));
    }

    #[test]
    fn test_speed_formula() {
        let tracker = CentroidTracker::new();
        // 3 px at 30 fps: 0.3 m * 30 * 3.6 = 32.4 km/h
        let matches = tracker.match_and_estimate(&[det_at(100, 100)], &[det_at(103, 100)], 30.0);
        let speed = matches[0].speed_kmh.unwrap();
        assert!((speed - 32.4).abs() < 1e-6);
    }

    #[test]
    fn test_large_displacement_clamped() {
        let tracker = CentroidTracker::new();
        // The raw formula for 1000 px at 30 fps gives 10800 km/h
        assert_eq!(tracker.estimate_speed_kmh(1000.0, 30.0), MAX_SPEED_KMH);
        // Within the radius but still above the cap: 90 px -> 972 km/h
        let matches = tracker.match_and_estimate(&[det_at(100, 100)], &[det_at(190, 100)], 30.0);
        assert_eq!(matches[0].speed_kmh, Some(MAX_SPEED_KMH));
    }

    #[test]
    fn test_outside_radius_has_no_match() {
        let tracker = CentroidTracker::new();
        let matches = tracker.match_and_estimate(&[det_at(100, 100)], &[det_at(100, 200)], 30.0);
        assert!(matches[0].previous.is_none());
        assert!(matches[0].speed_kmh.is_none());
        assert_eq!(matches[0].pixel_distance, 100.0);
    }

    #[test]
    fn test_no_previous_detections() {
        let tracker = CentroidTracker::new();
        let matches = tracker.match_and_estimate(&[], &[det_at(50, 50), det_at(300, 50)], 30.0);
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.speed_kmh.is_none()));
        assert!(matches[0].pixel_distance.is_infinite());
    }

    #[test]
    fn test_picks_nearest_previous() {
        let tracker = CentroidTracker::new();
        let previous = vec![det_at(100, 100), det_at(140, 100), det_at(400, 400)];
        let matches = tracker.match_and_estimate(&previous, &[det_at(145, 100)], 30.0);
        assert_eq!(matches[0].previous.as_ref(), Some(&previous[1]));
        assert_eq!(matches[0].pixel_distance, 5.0);
    }

    #[test]
    fn test_results_follow_current_order() {
        let tracker = CentroidTracker::new();
        let current = vec![det_at(500, 300), det_at(100, 100)];
        let matches = tracker.match_and_estimate(&[det_at(102, 100)], &current, 30.0);
        assert_eq!(matches[0].current, current[0]);
        assert!(matches[0].previous.is_none());
        assert_eq!(matches[1].current, current[1]);
        assert!(matches[1].previous.is_some());
    }
}
