//! Conflict classification.
//!
//! Dispersion is the spread `max - min` of a round's scores. The spread picks
//! a tier from the configured thresholds, and a major spread that involves a
//! judge with an active bias flag is promoted to critical.

use serde::{Deserialize, Serialize};

use crate::config::SeverityThresholds;
use crate::reliability::ReliabilityView;
use crate::resolver::ResolutionError;
use crate::types::{BiasDirection, JudgeScore, SeverityTier};

/// Outcome of classifying one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub dispersion: f64,
    pub tier: SeverityTier,

    /// Participants with an active bias flag, ordered by judge id
    pub biased_judges: Vec<(String, BiasDirection)>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictClassifier {
    thresholds: SeverityThresholds,
}

impl ConflictClassifier {
    pub fn new(thresholds: SeverityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SeverityThresholds {
        &self.thresholds
    }

    /// Max pairwise absolute difference. Zero for fewer than two scores.
    pub fn dispersion(scores: &[JudgeScore]) -> f64 {
        if scores.len() < 2 {
            return 0.0;
        }
        let (min, max) = scores
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s.score), hi.max(s.score))
            });
        max - min
    }

    /// Tier from dispersion alone (never critical).
    pub fn tier_for(&self, dispersion: f64) -> SeverityTier {
        if dispersion < self.thresholds.moderate_at {
            SeverityTier::Minor
        } else if dispersion < self.thresholds.major_at {
            SeverityTier::Moderate
        } else {
            SeverityTier::Major
        }
    }

    /// Classify a round of at least two scores.
    pub fn classify(
        &self,
        scores: &[JudgeScore],
        reliability: &dyn ReliabilityView,
    ) -> Result<Classification, ResolutionError> {
        let first = scores.first().ok_or(ResolutionError::EmptyRound)?;
        if scores.len() < 2 {
            return Err(ResolutionError::InsufficientJudges {
                key: first.round_key(),
                count: scores.len(),
            });
        }

        let dispersion = Self::dispersion(scores);
        let mut biased_judges: Vec<(String, BiasDirection)> = scores
            .iter()
            .filter_map(|s| {
                reliability
                    .bias(&s.judge_id)
                    .map(|direction| (s.judge_id.clone(), direction))
            })
            .collect();
        biased_judges.sort_by(|a, b| a.0.cmp(&b.0));
        biased_judges.dedup_by(|a, b| a.0 == b.0);

        let mut tier = self.tier_for(dispersion);
        if tier == SeverityTier::Major && !biased_judges.is_empty() {
            tier = SeverityTier::Critical;
        }

        Ok(Classification {
            dispersion,
            tier,
            biased_judges,
        })
    }
}
