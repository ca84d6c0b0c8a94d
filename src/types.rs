use image::RgbImage;
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub detection: DetectionConfig,
    pub violation: ViolationConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    #[serde(default = "default_input_size")]
    pub input_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Run the vehicle detector on every Nth frame (1 = every frame)
    #[serde(default = "default_frame_skip")]
    pub frame_skip: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationConfig {
    #[serde(default = "default_speed_limit")]
    pub speed_limit_kmh: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub input_dir: String,
    pub output_dir: String,
    /// Used when a source reports no usable frame rate
    #[serde(default = "default_fps")]
    pub fallback_fps: f64,
    /// Nominal rate assigned to directories of still images
    #[serde(default = "default_fps")]
    pub image_sequence_fps: f64,
    /// Write `<name>_annotated.mp4` next to the results (needs the `video` feature)
    #[serde(default)]
    pub save_annotated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_input_size() -> usize {
    640
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_frame_skip() -> u32 {
    2
}

fn default_speed_limit() -> f64 {
    60.0
}

fn default_fps() -> f64 {
    30.0
}

/// Per-run parameters handed to `Engine::start_session`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub speed_limit: f64,
    pub frame_skip: u32,
    pub confidence_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            speed_limit: default_speed_limit(),
            frame_skip: default_frame_skip(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            speed_limit: config.violation.speed_limit_kmh,
            frame_skip: config.detection.frame_skip,
            confidence_threshold: config.detection.confidence_threshold,
        }
    }
}

// ============================================================================
// FRAMES & DETECTIONS
// ============================================================================

/// One decoded frame. `index` is 1-based within the session.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub index: u64,
    /// Sample time in seconds (index / fps)
    pub timestamp: f64,
}

/// Axis-aligned box in working-resolution pixels: (x1, y1, x2, y2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        (self.width().max(0) as f32) * (self.height().max(0) as f32)
    }

    pub fn centroid(&self) -> (f32, f32) {
        (
            (self.x1 + self.x2) as f32 / 2.0,
            (self.y1 + self.y2) as f32 / 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Car,
    Bus,
    Truck,
}

impl VehicleClass {
    /// COCO class ids: 2 = car, 5 = bus, 7 = truck. Anything else is not a vehicle we track.
    pub fn from_coco_id(class_id: usize) -> Option<Self> {
        match class_id {
            2 => Some(VehicleClass::Car),
            5 => Some(VehicleClass::Bus),
            7 => Some(VehicleClass::Truck),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::Bus => "bus",
            VehicleClass::Truck => "truck",
        }
    }
}

/// A candidate vehicle in one frame. No identity across frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class: VehicleClass,
    pub area: f32,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, class: VehicleClass) -> Self {
        Self {
            bbox,
            confidence,
            class,
            area: bbox.area(),
        }
    }
}

/// Output of the plate recognizer. Empty text with zero confidence means
/// nothing legible, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlateReading {
    pub text: String,
    pub confidence: f32,
}

impl PlateReading {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_legible(&self) -> bool {
        !self.text.is_empty()
    }
}

// ============================================================================
// SIGNAL & VIOLATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Red,
    Green,
    Yellow,
    Unknown,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Red => "red",
            SignalStatus::Green => "green",
            SignalStatus::Yellow => "yellow",
            SignalStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalState {
    pub status: SignalStatus,
    /// In [0, 1]
    pub confidence: f32,
}

impl SignalState {
    pub fn unknown() -> Self {
        Self {
            status: SignalStatus::Unknown,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    RedLight,
    Speeding,
    None,
}

/// Verdict for one detection in one frame. Emitted for every detection, kept
/// in the violation log only when `is_violation` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationRecord {
    pub frame_index: u64,
    pub bbox: BBox,
    pub vehicle_class: VehicleClass,
    pub plate_text: String,
    pub plate_confidence: f32,
    /// Uncalibrated estimate; `None` when the tracker found no match
    pub speed_kmh: Option<f64>,
    pub is_violation: bool,
    pub violation_type: ViolationType,
    pub signal_status: SignalStatus,
    pub signal_confidence: f32,
}

/// Per-frame progress event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameProgress {
    pub frame_index: u64,
    pub detections_count: usize,
    pub violations_so_far: usize,
    pub timestamp: f64,
    pub signal_status: SignalStatus,
}

// ============================================================================
// SESSION LIFECYCLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    /// Stop requested; observed at an iteration boundary
    Stopped,
    /// Frame source ran dry
    Exhausted,
}

/// How many violations a run summary carries, in arrival order.
pub const SUMMARY_VIOLATION_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub violation_count: usize,
    pub violation_list: Vec<ViolationRecord>,
    pub final_state: SessionState,
    pub elapsed_secs: f64,
}

impl RunSummary {
    /// Video duration divided by processing time; >= 1.0 means faster than real time.
    pub fn realtime_factor(&self) -> f64 {
        if self.elapsed_secs <= 0.0 || self.fps <= 0.0 {
            return 0.0;
        }
        (self.total_frames as f64 / self.fps) / self.elapsed_secs
    }
}
