// src/violation.rs
//
// Turns a signal state and an optional speed estimate into a verdict.
// Precedence, first match wins:
//   1. red signal with confidence > 0.5      -> RedLight (speed ignored)
//   2. speed known and > limit + 5 km/h      -> Speeding
//   3. otherwise                              -> None
// No speed estimate means the speeding branch cannot fire for that detection.

use crate::types::{SignalState, SignalStatus, ViolationType};

/// Minimum red-signal confidence for a red-light verdict.
pub const RED_LIGHT_MIN_CONFIDENCE: f32 = 0.5;
/// Tolerance over the posted limit. Not configurable.
pub const SPEED_MARGIN_KMH: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub is_violation: bool,
    pub violation_type: ViolationType,
}

impl Verdict {
    fn clean() -> Self {
        Self {
            is_violation: false,
            violation_type: ViolationType::None,
        }
    }

    fn violation(violation_type: ViolationType) -> Self {
        Self {
            is_violation: true,
            violation_type,
        }
    }
}

pub fn classify_violation(signal: &SignalState, speed_kmh: Option<f64>, speed_limit: f64) -> Verdict {
    if signal.status == SignalStatus::Red && signal.confidence > RED_LIGHT_MIN_CONFIDENCE {
        return Verdict::violation(ViolationType::RedLight);
    }

    match speed_kmh {
        Some(speed) if speed > speed_limit + SPEED_MARGIN_KMH => {
            Verdict::violation(ViolationType::Speeding)
        }
        _ => Verdict::clean(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(status: SignalStatus, confidence: f32) -> SignalState {
        SignalState { status, confidence }
    }

    #[test]
    fn test_red_light_ignores_speed() {
        let v = classify_violation(&signal(SignalStatus::Red, 0.9), Some(0.0), 60.0);
        assert_eq!(v.violation_type, ViolationType::RedLight);
        assert!(v.is_violation);

        let v = classify_violation(&signal(SignalStatus::Red, 0.9), None, 60.0);
        assert_eq!(v.violation_type, ViolationType::RedLight);
    }

    #[test]
    fn test_red_light_takes_precedence_over_speeding() {
        let v = classify_violation(&signal(SignalStatus::Red, 0.9), Some(110.0), 60.0);
        assert_eq!(v.violation_type, ViolationType::RedLight);
    }

    #[test]
    fn test_low_confidence_red_falls_through() {
        let v = classify_violation(&signal(SignalStatus::Red, 0.5), Some(30.0), 60.0);
        assert_eq!(v, Verdict::clean());
    }

    #[test]
    fn test_speeding_over_margin() {
        let v = classify_violation(&signal(SignalStatus::Green, 0.9), Some(70.0), 60.0);
        assert_eq!(v.violation_type, ViolationType::Speeding);
        assert!(v.is_violation);
    }

    #[test]
    fn test_within_margin_is_clean() {
        let v = classify_violation(&signal(SignalStatus::Green, 0.9), Some(63.0), 60.0);
        assert!(!v.is_violation);
        assert_eq!(v.violation_type, ViolationType::None);

        // Exactly at limit + margin is still allowed
        let v = classify_violation(&signal(SignalStatus::Green, 0.9), Some(65.0), 60.0);
        assert!(!v.is_violation);
    }

    #[test]
    fn test_no_speed_estimate_is_never_speeding() {
        let v = classify_violation(&signal(SignalStatus::Unknown, 0.0), None, 60.0);
        assert!(!v.is_violation);
    }
}
