// src/pipeline/mod.rs

pub mod engine;
pub mod metrics;
pub mod session;
pub mod settings;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::{Engine, SessionHandle};
pub use metrics::{MetricsSummary, SessionMetrics};
pub use session::{SessionObserver, StreamSession};
pub use settings::{LiveSettings, SettingsUpdate, SharedSettings};
pub use status::{SharedStatus, StatusBoard};
