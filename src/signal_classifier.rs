// src/signal_classifier.rs
//
// HSV-based traffic-light state classifier.
//
// Counts pixels falling inside fixed red / green / yellow bands over the whole
// working frame and picks a state from the ratios. Bands use the 8-bit HSV
// convention (H: 0-180, S: 0-255, V: 0-255), red wrapping across hue 0.
//
// Stateless and deterministic: identical pixels give an identical SignalState.

use crate::types::{SignalState, SignalStatus};
use image::RgbImage;
use tracing::debug;

/// Minimum coloured-pixel count before any verdict is attempted.
pub const MIN_SIGNAL_PIXELS: u32 = 100;

const RED_RATIO: f32 = 0.6;
const GREEN_RATIO: f32 = 0.6;
const YELLOW_RATIO: f32 = 0.4;

/// Inclusive HSV band, 8-bit scale.
#[derive(Debug, Clone, Copy)]
struct HsvBand {
    h: (u8, u8),
    s_min: u8,
    v_min: u8,
}

impl HsvBand {
    #[inline]
    fn contains(&self, h: u8, s: u8, v: u8) -> bool {
        h >= self.h.0 && h <= self.h.1 && s >= self.s_min && v >= self.v_min
    }
}

const RED_LOW: HsvBand = HsvBand {
    h: (0, 10),
    s_min: 100,
    v_min: 100,
};
const RED_HIGH: HsvBand = HsvBand {
    h: (170, 180),
    s_min: 100,
    v_min: 100,
};
const GREEN: HsvBand = HsvBand {
    h: (40, 80),
    s_min: 40,
    v_min: 40,
};
const YELLOW: HsvBand = HsvBand {
    h: (20, 40),
    s_min: 100,
    v_min: 100,
};

/// Raw band counts for one frame. A pixel may land in more than one band
/// where bands share an edge (hue 40 is both yellow and green).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorCounts {
    pub red: u32,
    pub green: u32,
    pub yellow: u32,
}

impl ColorCounts {
    pub fn total(&self) -> u32 {
        self.red + self.green + self.yellow
    }
}

// ============================================================================
// HSV CONVERSION
// ============================================================================

/// Convert RGB to HSV.
/// Returns (H: 0-360, S: 0-100, V: 0-255).
#[inline]
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let r_n = r / 255.0;
    let g_n = g / 255.0;
    let b_n = b / 255.0;

    let max = r_n.max(g_n).max(b_n);
    let min = r_n.min(g_n).min(b_n);
    let delta = max - min;

    let h = if delta < 1e-6 {
        0.0
    } else if (max - r_n).abs() < 1e-6 {
        60.0 * (((g_n - b_n) / delta) % 6.0)
    } else if (max - g_n).abs() < 1e-6 {
        60.0 * (((b_n - r_n) / delta) + 2.0)
    } else {
        60.0 * (((r_n - g_n) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max < 1e-6 {
        0.0
    } else {
        (delta / max) * 100.0
    };

    let v = max * 255.0;

    (h, s, v)
}

/// Same conversion rescaled to the 8-bit convention used by the bands.
#[inline]
pub fn rgb_to_hsv8(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (h, s, v) = rgb_to_hsv(r as f32, g as f32, b as f32);
    let h8 = (h / 2.0).round().min(180.0) as u8;
    let s8 = (s * 2.55).round().min(255.0) as u8;
    let v8 = v.round().min(255.0) as u8;
    (h8, s8, v8)
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub fn count_signal_pixels(frame: &RgbImage) -> ColorCounts {
    let mut counts = ColorCounts::default();

    for pixel in frame.pixels() {
        let [r, g, b] = pixel.0;
        let (h, s, v) = rgb_to_hsv8(r, g, b);

        if RED_LOW.contains(h, s, v) || RED_HIGH.contains(h, s, v) {
            counts.red += 1;
        }
        if GREEN.contains(h, s, v) {
            counts.green += 1;
        }
        if YELLOW.contains(h, s, v) {
            counts.yellow += 1;
        }
    }

    counts
}

/// Turn band counts into a signal verdict. Red is checked first, then green,
/// then yellow; the first threshold met wins.
pub fn classify_counts(counts: ColorCounts) -> SignalState {
    let total = counts.total();
    if total < MIN_SIGNAL_PIXELS {
        return SignalState::unknown();
    }

    let total = total as f32;
    let r = counts.red as f32 / total;
    let g = counts.green as f32 / total;
    let y = counts.yellow as f32 / total;

    let (status, confidence) = if r > RED_RATIO {
        (SignalStatus::Red, r)
    } else if g > GREEN_RATIO {
        (SignalStatus::Green, g)
    } else if y > YELLOW_RATIO {
        (SignalStatus::Yellow, y)
    } else {
        (SignalStatus::Unknown, r.max(g).max(y))
    };

    SignalState { status, confidence }
}

/// Classify the dominant traffic-light colour of a frame.
pub fn classify_signal(frame: &RgbImage) -> SignalState {
    let counts = count_signal_pixels(frame);
    let state = classify_counts(counts);
    debug!(
        "Signal: {} ({:.2}) red={} green={} yellow={}",
        state.status.as_str(),
        state.confidence,
        counts.red,
        counts.green,
        counts.yellow
    );
    state
}

// ============================================================================
// TESTS
// ============================================================================
