//! Per-judge reliability statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::types::BiasDirection;

/// Tuning for reliability tracking and bias detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// EWMA smoothing factor (weight of the newest observation)
    pub smoothing: f64,

    /// Lowest reliability weight a judge can fall to
    pub floor: f64,

    /// Highest reliability weight
    pub ceiling: f64,

    /// Observations before the computed weight replaces the neutral 1.0
    pub cold_start_rounds: u64,

    /// Signed deviation magnitude that counts as biased
    pub bias_threshold: f64,

    /// Consecutive rounds beyond (or back within) the threshold that flip the flag
    pub bias_run_length: u32,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            smoothing: 2.0 / 11.0,
            floor: 0.1,
            ceiling: 1.0,
            cold_start_rounds: 3,
            bias_threshold: 2.0,
            bias_run_length: 3,
        }
    }
}

impl ReliabilityConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "reliability.smoothing must be in (0, 1] (got {})",
                self.smoothing
            )));
        }
        if !(self.floor > 0.0 && self.floor <= self.ceiling && self.ceiling <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "reliability bounds must satisfy 0 < floor ({}) <= ceiling ({}) <= 1",
                self.floor, self.ceiling
            )));
        }
        if !(self.bias_threshold > 0.0) {
            return Err(ConfigError::ValidationError(
                "reliability.bias_threshold must be positive".to_string(),
            ));
        }
        if self.bias_run_length == 0 {
            return Err(ConfigError::ValidationError(
                "reliability.bias_run_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A change in a judge's bias flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", content = "direction", rename_all = "snake_case")]
pub enum BiasTransition {
    Flagged(BiasDirection),
    /// Flag moved to the opposite direction without clearing first
    Reversed(BiasDirection),
    Cleared,
}

/// Historical agreement statistics for one judge.
///
/// The reliability weight is derived from the deviation history and is never
/// set directly; `observe` and `recompute` are the only writers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeProfile {
    judge_id: String,
    rounds: u64,
    mean_abs_deviation: f64,
    signed_deviation: f64,
    reliability_weight: f64,
    bias: Option<BiasDirection>,
    outside_run: u32,
    inside_run: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_direction: Option<BiasDirection>,
    resets: u32,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_reset_at: Option<DateTime<Utc>>,
}

impl JudgeProfile {
    /// A fresh profile with neutral weight.
    pub fn new(judge_id: impl Into<String>) -> Self {
        Self {
            judge_id: judge_id.into(),
            rounds: 0,
            mean_abs_deviation: 0.0,
            signed_deviation: 0.0,
            reliability_weight: 1.0,
            bias: None,
            outside_run: 0,
            inside_run: 0,
            run_direction: None,
            resets: 0,
            created_at: Utc::now(),
            updated_at: None,
            last_reset_at: None,
        }
    }

    pub fn judge_id(&self) -> &str {
        &self.judge_id
    }

    /// Resolved rounds observed since creation or the last reset.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// EWMA of `|score - resolved|`.
    pub fn mean_abs_deviation(&self) -> f64 {
        self.mean_abs_deviation
    }

    /// EWMA of `score - resolved`.
    pub fn signed_deviation(&self) -> f64 {
        self.signed_deviation
    }

    pub fn reliability_weight(&self) -> f64 {
        self.reliability_weight
    }

    pub fn bias(&self) -> Option<BiasDirection> {
        self.bias
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn last_reset_at(&self) -> Option<DateTime<Utc>> {
        self.last_reset_at
    }

    pub fn is_cold(&self, config: &ReliabilityConfig) -> bool {
        self.rounds < config.cold_start_rounds
    }

    /// Fold one signed deviation (`score - resolved`) into the profile.
    ///
    /// The first observation seeds both averages directly.
    pub fn observe(
        &mut self,
        signed_deviation: f64,
        config: &ReliabilityConfig,
    ) -> Option<BiasTransition> {
        let alpha = config.smoothing;
        if self.rounds == 0 {
            self.mean_abs_deviation = signed_deviation.abs();
            self.signed_deviation = signed_deviation;
        } else {
            self.mean_abs_deviation =
                alpha * signed_deviation.abs() + (1.0 - alpha) * self.mean_abs_deviation;
            self.signed_deviation = alpha * signed_deviation + (1.0 - alpha) * self.signed_deviation;
        }
        self.rounds += 1;
        self.updated_at = Some(Utc::now());
        self.recompute(config);
        self.track_bias(config)
    }

    /// Re-derive the reliability weight from the stored history.
    pub fn recompute(&mut self, config: &ReliabilityConfig) {
        self.reliability_weight = if self.is_cold(config) {
            1.0
        } else {
            (1.0 / (1.0 + self.mean_abs_deviation)).clamp(config.floor, config.ceiling)
        };
    }

    fn track_bias(&mut self, config: &ReliabilityConfig) -> Option<BiasTransition> {
        let direction = BiasDirection::of(self.signed_deviation);
        if self.signed_deviation.abs() > config.bias_threshold {
            // A run beyond the threshold restarts when it changes side
            if self.run_direction == Some(direction) {
                self.outside_run += 1;
            } else {
                self.outside_run = 1;
                self.run_direction = Some(direction);
            }
            self.inside_run = 0;
        } else {
            self.inside_run += 1;
            self.outside_run = 0;
            self.run_direction = None;
        }

        match self.bias {
            None if self.outside_run >= config.bias_run_length => {
                self.bias = Some(direction);
                Some(BiasTransition::Flagged(direction))
            }
            Some(current)
                if self.outside_run >= config.bias_run_length && current != direction =>
            {
                self.bias = Some(direction);
                Some(BiasTransition::Reversed(direction))
            }
            Some(_) if self.inside_run >= config.bias_run_length => {
                self.bias = None;
                Some(BiasTransition::Cleared)
            }
            _ => None,
        }
    }

    /// Administrative reset: forget history, keep identity and the reset count.
    pub fn reset(&mut self) {
        let now = Utc::now();
        *self = Self {
            judge_id: std::mem::take(&mut self.judge_id),
            resets: self.resets + 1,
            created_at: self.created_at,
            last_reset_at: Some(now),
            updated_at: Some(now),
            ..Self::new(String::new())
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReliabilityConfig {
        ReliabilityConfig::default()
    }

    #[test]
    fn test_cold_start_weight_is_neutral() {
        let cfg = config();
        let mut profile = JudgeProfile::new("a");
        profile.observe(4.0, &cfg);
        profile.observe(4.0, &cfg);
        assert_eq!(profile.rounds(), 2);
        assert_eq!(profile.reliability_weight(), 1.0);

        profile.observe(4.0, &cfg);
        assert!(profile.reliability_weight() < 1.0);
        assert!((profile.reliability_weight() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_exact_agreement_gives_full_weight() {
        let cfg = config();
        let mut profile = JudgeProfile::new("a");
        for _ in 0..20 {
            profile.observe(0.0, &cfg);
        }
        assert_eq!(profile.reliability_weight(), 1.0);
    }

    #[test]
    fn test_large_deviation_hits_floor() {
        let cfg = config();
        let mut profile = JudgeProfile::new("a");
        for _ in 0..20 {
            profile.observe(-20.0, &cfg);
        }
        assert_eq!(profile.reliability_weight(), cfg.floor);
    }

    #[test]
    fn test_bias_flags_after_run_length() {
        let cfg = config();
        let mut profile = JudgeProfile::new("a");
        assert_eq!(profile.observe(5.0, &cfg), None);
        assert_eq!(profile.observe(5.0, &cfg), None);
        assert_eq!(
            profile.observe(5.0, &cfg),
            Some(BiasTransition::Flagged(BiasDirection::Above))
        );
        assert_eq!(profile.bias(), Some(BiasDirection::Above));
    }

    #[test]
    fn test_bias_clears_after_agreement() {
        let cfg = config();
        let mut profile = JudgeProfile::new("a");
        for _ in 0..3 {
            profile.observe(5.0, &cfg);
        }
        assert!(profile.bias().is_some());

        let mut cleared = false;
        for _ in 0..30 {
            if profile.observe(0.0, &cfg) == Some(BiasTransition::Cleared) {
                cleared = true;
                break;
            }
        }
        assert!(cleared);
        assert_eq!(profile.bias(), None);
    }

    #[test]
    fn test_bias_reverses_direction() {
        let cfg = ReliabilityConfig {
            smoothing: 1.0,
            ..config()
        };
        let mut profile = JudgeProfile::new("a");
        for _ in 0..3 {
            profile.observe(5.0, &cfg);
        }
        assert_eq!(profile.bias(), Some(BiasDirection::Above));

        let mut last = None;
        for _ in 0..3 {
            last = profile.observe(-5.0, &cfg);
        }
        assert_eq!(last, Some(BiasTransition::Reversed(BiasDirection::Below)));
    }

    #[test]
    fn test_reset_keeps_identity_and_counts() {
        let cfg = config();
        let mut profile = JudgeProfile::new("judge-7");
        let created = profile.created_at();
        for _ in 0..5 {
            profile.observe(5.0, &cfg);
        }
        profile.reset();

        assert_eq!(profile.judge_id(), "judge-7");
        assert_eq!(profile.rounds(), 0);
        assert_eq!(profile.bias(), None);
        assert_eq!(profile.reliability_weight(), 1.0);
        assert_eq!(profile.resets(), 1);
        assert_eq!(profile.created_at(), created);
        assert!(profile.last_reset_at().is_some());
    }

    #[test]
    fn test_invalid_smoothing_rejected() {
        let cfg = ReliabilityConfig {
            smoothing: 0.0,
            ..config()
        };
        assert!(cfg.validate().is_err());
    }
}
