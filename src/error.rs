// src/error.rs
//
// Error taxonomy for the detection engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The frame source could not be opened. Fatal; raised before the session runs.
    #[error("Frame source unavailable: {0}")]
    SourceUnavailable(String),

    /// A detector or recognizer call failed. Recovered inside the frame loop.
    #[error("{capability} failed on frame {frame_index}: {reason}")]
    CapabilityFailure {
        capability: &'static str,
        frame_index: u64,
        reason: String,
    },

    /// Rejected settings; the previous valid settings stay in effect.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("A session is already running on this engine")]
    SessionBusy,

    #[error("Session worker terminated abnormally: {0}")]
    WorkerFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl EngineError {
    pub fn source_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    pub fn capability(capability: &'static str, frame_index: u64, err: &anyhow::Error) -> Self {
        Self::CapabilityFailure {
            capability,
            frame_index,
            reason: format!("{:#}", err),
        }
    }
}
