//! Resolution strategy selection.
//!
//! The resolver turns one round of judge scores into a `ConflictRecord`:
//!
//! | tier     | resolved score                               | confidence                       |
//! |----------|----------------------------------------------|----------------------------------|
//! | minor    | arithmetic mean                              | `minor - minor_penalty * spread` |
//! | moderate | evidence-weighted mean                       | `moderate - moderate_penalty * spread` |
//! | major    | none, escalated for human review             | 0                                |
//! | critical | evidence-weighted, biased judges discounted  | `critical`                       |
//!
//! A major round whose exact score set already has a recorded human decision
//! replays that decision instead of escalating again.
//!
//! The resolver itself holds no mutable state; reliability and overrides are
//! passed in for each call.

mod strategies;

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::classifier::ConflictClassifier;
use crate::config::{ConfidencePolicy, ConfigError, ConsensusConfig, ScoreScale};
use crate::escalation::{OverrideKey, OverrideLedger};
use crate::evidence::{EvidenceAssessor, EvidenceQuality};
use crate::reliability::ReliabilityView;
use crate::types::{
    ConflictRecord, CriterionOutcome, EscalationReason, HumanDecision, JudgeScore, RecordStatus,
    RequiredAction, Resolution, RoundKey, SeverityTier,
};

/// Errors that reject a single round.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Round has no scores")]
    EmptyRound,

    #[error("{key} needs at least 2 judges, got {count}")]
    InsufficientJudges { key: RoundKey, count: usize },

    #[error("Score {score} from '{judge_id}' on {key} is outside the scale [{min}, {max}]")]
    InvalidScoreRange {
        judge_id: String,
        key: RoundKey,
        score: f64,
        min: f64,
        max: f64,
    },

    #[error("Score for {found} submitted to round {expected}")]
    MixedRound { expected: RoundKey, found: RoundKey },

    #[error("Judge '{judge_id}' reported more than once for {key}")]
    DuplicateJudge { judge_id: String, key: RoundKey },

    #[error("Unknown criterion: {0}")]
    UnknownCriterion(String),

    #[error("Got {qualities} evidence assessments for {scores} scores")]
    MisalignedQualities { scores: usize, qualities: usize },
}

impl ResolutionError {
    /// Whether waiting for more input can fix the round.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientJudges { .. })
    }
}

/// Stateless tier-aware resolver.
#[derive(Debug, Clone)]
pub struct Resolver {
    scale: ScoreScale,
    criteria: Vec<String>,
    classifier: ConflictClassifier,
    confidence: ConfidencePolicy,
    assessor: EvidenceAssessor,
}

impl Resolver {
    pub fn new(config: &ConsensusConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            scale: config.scale,
            criteria: config.criterion_ids().map(str::to_string).collect(),
            classifier: ConflictClassifier::new(config.thresholds),
            confidence: config.confidence,
            assessor: EvidenceAssessor::new(config.evidence.clone())?,
        })
    }

    pub fn assessor(&self) -> &EvidenceAssessor {
        &self.assessor
    }

    pub fn classifier(&self) -> &ConflictClassifier {
        &self.classifier
    }

    /// Resolve a round, assessing every rationale.
    pub fn resolve(
        &self,
        scores: &[JudgeScore],
        reliability: &dyn ReliabilityView,
        overrides: &OverrideLedger,
    ) -> Result<ConflictRecord, ResolutionError> {
        let qualities: Vec<EvidenceQuality> = scores
            .iter()
            .map(|s| self.assessor.assess(&s.rationale))
            .collect();
        self.resolve_assessed(scores, &qualities, reliability, overrides)
    }

    /// Resolve a round with qualities already assessed (aligned with `scores`).
    pub fn resolve_assessed(
        &self,
        scores: &[JudgeScore],
        qualities: &[EvidenceQuality],
        reliability: &dyn ReliabilityView,
        overrides: &OverrideLedger,
    ) -> Result<ConflictRecord, ResolutionError> {
        if qualities.len() != scores.len() {
            return Err(ResolutionError::MisalignedQualities {
                scores: scores.len(),
                qualities: qualities.len(),
            });
        }
        let key = self.check_round(scores)?;

        let mut paired: Vec<(JudgeScore, EvidenceQuality)> = scores
            .iter()
            .cloned()
            .zip(qualities.iter().cloned())
            .collect();
        paired.sort_by(|a, b| a.0.judge_id.cmp(&b.0.judge_id));
        let (scores, qualities): (Vec<JudgeScore>, Vec<EvidenceQuality>) =
            paired.into_iter().unzip();

        let classification = self.classifier.classify(&scores, reliability)?;
        let spread = classification.dispersion;
        let policy = &self.confidence;

        let (resolved, resolution, confidence) = match classification.tier {
            SeverityTier::Minor => {
                let (resolved, resolution) = strategies::minor(&scores);
                let confidence = policy.minor - policy.minor_penalty * spread;
                (Some(resolved), resolution, confidence)
            }
            SeverityTier::Moderate => {
                let weights: Vec<f64> = qualities.iter().map(|q| q.weight).collect();
                let all_equal = self.assessor.all_equal(&weights);
                let (resolved, resolution) = strategies::moderate(&scores, &qualities, all_equal);
                let confidence = policy.moderate - policy.moderate_penalty * spread;
                (Some(resolved), resolution, confidence)
            }
            SeverityTier::Major => {
                let reason = EscalationReason::MajorDisagreement { dispersion: spread };
                self.escalate_or_replay(&key, &scores, reason, overrides)
            }
            SeverityTier::Critical => {
                let ids: Vec<&str> = scores.iter().map(|s| s.judge_id.as_str()).collect();
                let weights = reliability.round_weights(&ids);
                let (resolved, resolution) = strategies::bias_adjusted(
                    &scores,
                    &qualities,
                    &classification.biased_judges,
                    &weights,
                );
                (Some(resolved), resolution, policy.critical)
            }
        };

        let record = ConflictRecord {
            item_id: key.item_id.clone(),
            criterion_id: key.criterion_id.clone(),
            scores,
            dispersion: spread,
            tier: classification.tier,
            status: if resolved.is_some() {
                RecordStatus::Resolved
            } else {
                RecordStatus::Escalated
            },
            resolution,
            resolved_score: resolved,
            confidence: confidence.clamp(0.0, 1.0),
            recorded_at: Utc::now(),
        };

        tracing::debug!(
            round = %key,
            tier = %record.tier,
            strategy = record.resolution.name(),
            spread = spread,
            resolved = ?record.resolved_score,
            confidence = record.confidence,
            "Round resolved"
        );

        Ok(record)
    }

    /// Outcome for a round whose barrier expired.
    ///
    /// Two or more scores become an escalated record (or a replayed decision);
    /// fewer become a `TimedOut` outcome.
    pub fn timed_out(
        &self,
        key: &RoundKey,
        scores: &[JudgeScore],
        required: usize,
        waited: Duration,
        overrides: &OverrideLedger,
    ) -> Result<CriterionOutcome, ResolutionError> {
        let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);

        if scores.len() < 2 {
            if let Some(first) = scores.first() {
                self.check_round(std::slice::from_ref(first))?;
            }
            tracing::warn!(
                round = %key,
                reported = scores.len(),
                required = required,
                waited_ms = waited_ms,
                "Round timed out without enough judges"
            );
            return Ok(CriterionOutcome::TimedOut {
                item_id: key.item_id.clone(),
                criterion_id: key.criterion_id.clone(),
                scores: scores.to_vec(),
                required,
                waited_ms,
                escalated_at: Utc::now(),
            });
        }

        let reason = EscalationReason::Timeout {
            reported: scores.len(),
            required,
            waited_ms,
        };
        let record = self.escalate_round(key, scores, reason, overrides)?;

        tracing::warn!(
            round = %key,
            reported = record.scores.len(),
            required = required,
            replayed = !record.is_escalated(),
            "Round timed out"
        );

        Ok(CriterionOutcome::Conflict { record })
    }

    /// Build a major-tier record for a round automation will not decide:
    /// escalated, or resolved by a recorded human decision for this exact
    /// score set.
    pub fn escalate_round(
        &self,
        key: &RoundKey,
        scores: &[JudgeScore],
        reason: EscalationReason,
        overrides: &OverrideLedger,
    ) -> Result<ConflictRecord, ResolutionError> {
        let checked = self.check_round(scores)?;
        if &checked != key {
            return Err(ResolutionError::MixedRound {
                expected: key.clone(),
                found: checked,
            });
        }
        if scores.len() < 2 {
            return Err(ResolutionError::InsufficientJudges {
                key: checked,
                count: scores.len(),
            });
        }

        let mut scores = scores.to_vec();
        scores.sort_by(|a, b| a.judge_id.cmp(&b.judge_id));
        let spread = ConflictClassifier::dispersion(&scores);
        let (resolved, resolution, confidence) =
            self.escalate_or_replay(key, &scores, reason, overrides);

        Ok(ConflictRecord {
            item_id: key.item_id.clone(),
            criterion_id: key.criterion_id.clone(),
            scores,
            dispersion: spread,
            tier: SeverityTier::Major,
            status: if resolved.is_some() {
                RecordStatus::Resolved
            } else {
                RecordStatus::Escalated
            },
            resolution,
            resolved_score: resolved,
            confidence,
            recorded_at: Utc::now(),
        })
    }

    /// Pass a lone score through with single-judge confidence.
    pub fn single_judge(&self, score: &JudgeScore) -> Result<CriterionOutcome, ResolutionError> {
        self.check_round(std::slice::from_ref(score))?;
        Ok(CriterionOutcome::SingleJudge {
            score: score.clone(),
            confidence: self.confidence.single_judge(),
            resolved_at: Utc::now(),
        })
    }

    /// Check a reviewer's decision before it is recorded.
    pub fn check_decision(
        &self,
        key: &RoundKey,
        decision: &HumanDecision,
    ) -> Result<(), ResolutionError> {
        if !self.scale.contains(decision.score) {
            return Err(ResolutionError::InvalidScoreRange {
                judge_id: decision.reviewer.clone(),
                key: key.clone(),
                score: decision.score,
                min: self.scale.min,
                max: self.scale.max,
            });
        }
        Ok(())
    }

    fn escalate_or_replay(
        &self,
        key: &RoundKey,
        scores: &[JudgeScore],
        reason: EscalationReason,
        overrides: &OverrideLedger,
    ) -> (Option<f64>, Resolution, f64) {
        match overrides.get(&OverrideKey::from_scores(key, scores)) {
            Some(decision) => {
                tracing::info!(
                    round = %key,
                    reviewer = %decision.reviewer,
                    "Replaying human decision"
                );
                (
                    Some(decision.score),
                    Resolution::HumanOverride {
                        decision: decision.clone(),
                    },
                    self.confidence.human_override,
                )
            }
            None => {
                tracing::warn!(round = %key, reason = %reason, "Round escalated for human review");
                (
                    None,
                    Resolution::Escalated {
                        reason,
                        required_action: RequiredAction::HumanReview,
                        escalated_at: Utc::now(),
                    },
                    0.0,
                )
            }
        }
    }

    /// Validate a round: one key, known criterion, in-range, distinct judges.
    fn check_round(&self, scores: &[JudgeScore]) -> Result<RoundKey, ResolutionError> {
        let first = scores.first().ok_or(ResolutionError::EmptyRound)?;
        let key = first.round_key();

        if !self.criteria.iter().any(|c| *c == key.criterion_id) {
            return Err(ResolutionError::UnknownCriterion(key.criterion_id));
        }

        let mut seen: Vec<&str> = Vec::with_capacity(scores.len());
        for score in scores {
            if score.item_id != key.item_id || score.criterion_id != key.criterion_id {
                return Err(ResolutionError::MixedRound {
                    expected: key,
                    found: score.round_key(),
                });
            }
            if !self.scale.contains(score.score) {
                return Err(ResolutionError::InvalidScoreRange {
                    judge_id: score.judge_id.clone(),
                    key,
                    score: score.score,
                    min: self.scale.min,
                    max: self.scale.max,
                });
            }
            if seen.contains(&score.judge_id.as_str()) {
                return Err(ResolutionError::DuplicateJudge {
                    judge_id: score.judge_id.clone(),
                    key,
                });
            }
            seen.push(&score.judge_id);
        }

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::ReliabilityLedger;

    fn resolver() -> Resolver {
        Resolver::new(&ConsensusConfig::default()).unwrap()
    }

    fn round(values: &[(&str, f64)]) -> Vec<JudgeScore> {
        values
            .iter()
            .map(|(j, v)| JudgeScore::new(*j, "plan-1", "clarity", *v, ""))
            .collect()
    }

    #[test]
    fn test_minor_round() {
        let record = resolver()
            .resolve(
                &round(&[("a", 8.0), ("b", 8.2), ("c", 8.1)]),
                &ReliabilityLedger::default(),
                &OverrideLedger::new(),
            )
            .unwrap();

        assert_eq!(record.tier, SeverityTier::Minor);
        assert_eq!(record.status, RecordStatus::Resolved);
        assert!((record.resolved_score.unwrap() - 8.1).abs() < 1e-9);
        assert!((record.confidence - 0.945).abs() < 1e-9);
        assert_eq!(record.resolution, Resolution::Mean);
    }

    #[test]
    fn test_major_round_escalates() {
        let record = resolver()
            .resolve(
                &round(&[("a", 6.0), ("b", 9.5)]),
                &ReliabilityLedger::default(),
                &OverrideLedger::new(),
            )
            .unwrap();

        assert_eq!(record.tier, SeverityTier::Major);
        assert_eq!(record.status, RecordStatus::Escalated);
        assert_eq!(record.resolved_score, None);
        assert_eq!(record.confidence, 0.0);
        assert!(matches!(
            record.resolution,
            Resolution::Escalated {
                required_action: RequiredAction::HumanReview,
                ..
            }
        ));
    }

    #[test]
    fn test_major_round_replays_decision() {
        let scores = round(&[("a", 6.0), ("b", 9.5)]);
        let mut overrides = OverrideLedger::new();
        overrides.record(
            OverrideKey::from_scores(&scores[0].round_key(), &scores),
            HumanDecision::new(7.0, "lead@example.com"),
        );

        let record = resolver()
            .resolve(&scores, &ReliabilityLedger::default(), &overrides)
            .unwrap();
        assert_eq!(record.status, RecordStatus::Resolved);
        assert_eq!(record.resolved_score, Some(7.0));
        assert_eq!(record.confidence, 0.9);
        assert_eq!(record.resolution.name(), "human_override");
    }

    #[test]
    fn test_out_of_range_rejected() {
        let result = resolver().resolve(
            &round(&[("a", 6.0), ("b", 11.0)]),
            &ReliabilityLedger::default(),
            &OverrideLedger::new(),
        );
        assert!(matches!(
            result,
            Err(ResolutionError::InvalidScoreRange { score, .. }) if score == 11.0
        ));
    }

    #[test]
    fn test_mixed_round_rejected() {
        let mut scores = round(&[("a", 6.0), ("b", 6.5)]);
        scores[1].criterion_id = "prioritization".into();
        let result = resolver().resolve(
            &scores,
            &ReliabilityLedger::default(),
            &OverrideLedger::new(),
        );
        assert!(matches!(result, Err(ResolutionError::MixedRound { .. })));
    }

    #[test]
    fn test_duplicate_judge_rejected() {
        let result = resolver().resolve(
            &round(&[("a", 6.0), ("a", 6.5)]),
            &ReliabilityLedger::default(),
            &OverrideLedger::new(),
        );
        assert!(matches!(result, Err(ResolutionError::DuplicateJudge { .. })));
    }

    #[test]
    fn test_unknown_criterion_rejected() {
        let scores = vec![
            JudgeScore::new("a", "plan-1", "style", 5.0, ""),
            JudgeScore::new("b", "plan-1", "style", 5.0, ""),
        ];
        let result = resolver().resolve(
            &scores,
            &ReliabilityLedger::default(),
            &OverrideLedger::new(),
        );
        assert_eq!(
            result.unwrap_err(),
            ResolutionError::UnknownCriterion("style".into())
        );
    }

    #[test]
    fn test_misaligned_qualities_rejected() {
        let r = resolver();
        let scores = round(&[("a", 5.0), ("b", 7.5)]);
        let qualities = vec![r.assessor().assess("")];
        let result = r.resolve_assessed(
            &scores,
            &qualities,
            &ReliabilityLedger::default(),
            &OverrideLedger::new(),
        );
        assert_eq!(
            result.unwrap_err(),
            ResolutionError::MisalignedQualities {
                scores: 2,
                qualities: 1
            }
        );
    }

    #[test]
    fn test_order_does_not_matter() {
        let r = resolver();
        let forward = round(&[("a", 5.0), ("b", 7.5), ("c", 6.0)]);
        let mut backward = forward.clone();
        backward.reverse();

        let ledger = ReliabilityLedger::default();
        let overrides = OverrideLedger::new();
        let x = r.resolve(&forward, &ledger, &overrides).unwrap();
        let y = r.resolve(&backward, &ledger, &overrides).unwrap();
        assert_eq!(x.resolved_score, y.resolved_score);
        assert_eq!(x.scores, y.scores);
    }

    #[test]
    fn test_timed_out_with_one_score() {
        let scores = round(&[("a", 6.0)]);
        let outcome = resolver()
            .timed_out(
                &scores[0].round_key(),
                &scores,
                3,
                Duration::from_secs(30),
                &OverrideLedger::new(),
            )
            .unwrap();
        assert!(matches!(
            outcome,
            CriterionOutcome::TimedOut { waited_ms: 30_000, required: 3, .. }
        ));
    }

    #[test]
    fn test_timed_out_with_two_scores_escalates_even_when_close() {
        let scores = round(&[("a", 6.0), ("b", 6.1)]);
        let outcome = resolver()
            .timed_out(
                &scores[0].round_key(),
                &scores,
                3,
                Duration::from_secs(30),
                &OverrideLedger::new(),
            )
            .unwrap();
        let record = outcome.record().unwrap();
        assert!(record.is_escalated());
        assert_eq!(record.tier, SeverityTier::Major);
        assert!(matches!(
            record.escalation_reason(),
            Some(EscalationReason::Timeout { reported: 2, .. })
        ));
    }

    #[test]
    fn test_single_judge_confidence() {
        let score = JudgeScore::new("a", "plan-1", "clarity", 7.0, "");
        let outcome = resolver().single_judge(&score).unwrap();
        assert_eq!(outcome.resolved_score(), Some(7.0));
        assert!((outcome.confidence() - 0.475).abs() < 1e-12);
    }

    #[test]
    fn test_decision_out_of_range() {
        let key = RoundKey::new("plan-1", "clarity");
        let result = resolver().check_decision(&key, &HumanDecision::new(12.0, "lead"));
        assert!(result.is_err());
    }
}
