use crate::error::{EngineError, Result};
use crate::types::{Config, SessionConfig};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        SessionConfig::from(self).validate()?;
        if !(self.video.fallback_fps.is_finite() && self.video.fallback_fps > 0.0) {
            return Err(EngineError::config(format!(
                "video.fallback_fps must be positive, got {}",
                self.video.fallback_fps
            )));
        }
        if !(self.video.image_sequence_fps.is_finite() && self.video.image_sequence_fps > 0.0) {
            return Err(EngineError::config(format!(
                "video.image_sequence_fps must be positive, got {}",
                self.video.image_sequence_fps
            )));
        }
        Ok(())
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        validate_frame_skip(self.frame_skip)?;
        validate_confidence(self.confidence_threshold)?;
        if !(self.speed_limit.is_finite() && self.speed_limit > 0.0) {
            return Err(EngineError::config(format!(
                "speed_limit must be a positive number of km/h, got {}",
                self.speed_limit
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_frame_skip(frame_skip: u32) -> Result<()> {
    if frame_skip < 1 {
        return Err(EngineError::config("frame_skip must be >= 1"));
    }
    Ok(())
}

pub(crate) fn validate_confidence(threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(EngineError::config(format!(
            "confidence_threshold must be in [0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
model:
  path: "models/yolov8n.onnx"
detection:
  confidence_threshold: 0.4
  frame_skip: 3
violation:
  speed_limit_kmh: 50.0
video:
  input_dir: "uploads"
  output_dir: "results"
logging:
  level: "debug"
"#;

    #[test]
    fn test_parse_sample_config_with_defaults() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.model.input_size, 640);
        assert_eq!(config.video.fallback_fps, 30.0);
        assert!(!config.video.save_annotated);
        assert!(config.validate().is_ok());

        let session = SessionConfig::from(&config);
        assert_eq!(session.frame_skip, 3);
        assert_eq!(session.speed_limit, 50.0);
        assert!((session.confidence_threshold - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_zero_frame_skip_rejected() {
        let cfg = SessionConfig {
            frame_skip: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::ConfigInvalid(_))));
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let cfg = SessionConfig {
            confidence_threshold: 1.5,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_non_positive_speed_limit_rejected() {
        let cfg = SessionConfig {
            speed_limit: 0.0,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
