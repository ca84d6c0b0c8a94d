// src/lib.rs
//
// Streaming traffic-violation detection: per-frame signal classification,
// detector scheduling, nearest-centroid speed estimation and red-light /
// speeding verdicts, with a live status snapshot for a request layer.

pub mod capability;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod signal_classifier;
pub mod tracker;
pub mod types;
#[cfg(feature = "onnx")]
pub mod vehicle_detection;
pub mod video_processor;
pub mod violation;

pub use capability::{NullRecognizer, PlateRecognizer, VehicleDetector};
pub use error::{EngineError, Result};
pub use pipeline::{Engine, SessionHandle, SessionObserver, SettingsUpdate, SharedStatus};
pub use types::{
    Config, RunSummary, SessionConfig, SessionState, SignalState, SignalStatus, ViolationRecord,
    ViolationType,
};
