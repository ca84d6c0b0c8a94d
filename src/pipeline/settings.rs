// src/pipeline/settings.rs
//
// Live-tunable knobs. Written by the request layer, read by the frame loop at
// the start of every frame, so an update takes effect on the next frame
// without restarting the session.

use crate::config::{validate_confidence, validate_frame_skip};
use crate::error::Result;
use crate::types::SessionConfig;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiveSettings {
    pub frame_skip: u32,
    pub confidence_threshold: f32,
    pub speed_limit: f64,
}

impl From<SessionConfig> for LiveSettings {
    fn from(config: SessionConfig) -> Self {
        Self {
            frame_skip: config.frame_skip,
            confidence_threshold: config.confidence_threshold,
            speed_limit: config.speed_limit,
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct SettingsUpdate {
    pub frame_skip: Option<u32>,
    pub confidence_threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct SharedSettings {
    inner: Arc<Mutex<LiveSettings>>,
}

impl SharedSettings {
    pub fn new(initial: LiveSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LiveSettings> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> LiveSettings {
        *self.lock()
    }

    pub fn replace(&self, settings: LiveSettings) {
        *self.lock() = settings;
    }

    /// Validate every field first, then apply all of them under one lock.
    /// On error nothing changes.
    pub fn apply(&self, update: SettingsUpdate) -> Result<LiveSettings> {
        if let Some(frame_skip) = update.frame_skip {
            validate_frame_skip(frame_skip)?;
        }
        if let Some(threshold) = update.confidence_threshold {
            validate_confidence(threshold)?;
        }

        let updated = {
            let mut settings = self.lock();
            if let Some(frame_skip) = update.frame_skip {
                settings.frame_skip = frame_skip;
            }
            if let Some(threshold) = update.confidence_threshold {
                settings.confidence_threshold = threshold;
            }
            *settings
        };

        info!(
            "⚙️  Settings updated: frame_skip={}, confidence={:.2}",
            updated.frame_skip, updated.confidence_threshold
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn shared() -> SharedSettings {
        SharedSettings::new(LiveSettings::from(SessionConfig::default()))
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let settings = shared();
        let updated = settings
            .apply(SettingsUpdate {
                frame_skip: Some(4),
                confidence_threshold: None,
            })
            .unwrap();
        assert_eq!(updated.frame_skip, 4);
        assert!((updated.confidence_threshold - 0.5).abs() < 1e-6);
        assert_eq!(settings.snapshot(), updated);
    }

    #[test]
    fn test_invalid_update_leaves_previous_settings() {
        let settings = shared();
        let before = settings.snapshot();

        let result = settings.apply(SettingsUpdate {
            frame_skip: Some(0),
            confidence_threshold: Some(0.9),
        });
        assert!(matches!(result, Err(EngineError::ConfigInvalid(_))));
        assert_eq!(settings.snapshot(), before);
    }

    #[test]
    fn test_update_visible_through_clone() {
        let settings = shared();
        let reader = settings.clone();
        settings
            .apply(SettingsUpdate {
                frame_skip: None,
                confidence_threshold: Some(0.25),
            })
            .unwrap();
        assert!((reader.snapshot().confidence_threshold - 0.25).abs() < 1e-6);
    }
}
