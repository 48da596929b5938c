//! Synthesizer: aggregates per-criterion outcomes into one result.
//!
//! Aggregation rules:
//! 1. Every configured criterion needs a resolved or escalated outcome,
//!    otherwise the item is incomplete
//! 2. The overall score is the weighted sum of resolved criterion scores.
//!    Escalated criteria drop out and the remaining weights are rescaled, so
//!    the score is provisional until a human decides
//! 3. Confidence is the weighted sum of criterion confidences (escalated
//!    criteria count as zero), minus a fixed penalty per escalation

use std::collections::BTreeMap;

use chrono::Utc;

use crate::config::{ConsensusConfig, CriterionConfig};
use crate::types::{ConsensusResult, CriterionOutcome, CriterionReport, CriterionState};
use crate::ConsensusError;

pub struct Synthesizer {
    criteria: Vec<CriterionConfig>,
    escalation_penalty: f64,
}

impl Synthesizer {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            criteria: config.criteria.clone(),
            escalation_penalty: config.confidence.escalation_penalty,
        }
    }

    pub fn criteria(&self) -> &[CriterionConfig] {
        &self.criteria
    }

    /// Per-criterion report lines in configured order.
    pub fn report(&self, outcomes: &BTreeMap<String, CriterionOutcome>) -> Vec<CriterionReport> {
        self.criteria
            .iter()
            .map(|c| CriterionReport {
                criterion_id: c.id.clone(),
                weight: c.weight,
                state: outcomes
                    .get(&c.id)
                    .map(CriterionOutcome::state)
                    .unwrap_or(CriterionState::Pending),
            })
            .collect()
    }

    /// Weighted score over the criteria present in `scores`.
    ///
    /// Returns `None` when no configured criterion has a score.
    pub fn weighted_score(&self, scores: &BTreeMap<String, f64>) -> Option<f64> {
        let present: Vec<(f64, f64)> = self
            .criteria
            .iter()
            .filter_map(|c| scores.get(&c.id).map(|s| (c.weight, *s)))
            .collect();
        if present.is_empty() {
            return None;
        }

        let weighted: f64 = present.iter().map(|(w, s)| w * s).sum();
        if present.len() == self.criteria.len() {
            return Some(weighted);
        }
        let total: f64 = present.iter().map(|(w, _)| w).sum();
        Some(weighted / total)
    }

    /// Build a result from a complete outcome set.
    pub fn synthesize(
        &self,
        item_id: &str,
        version: u32,
        outcomes: &BTreeMap<String, CriterionOutcome>,
    ) -> Result<ConsensusResult, ConsensusError> {
        let mut missing = Vec::new();
        let mut failed = Vec::new();
        for criterion in &self.criteria {
            match outcomes.get(&criterion.id) {
                None => missing.push(criterion.id.clone()),
                Some(o) if o.is_failed() => failed.push(criterion.id.clone()),
                Some(_) => {}
            }
        }
        if !missing.is_empty() || !failed.is_empty() {
            return Err(ConsensusError::IncompleteCriteria {
                item_id: item_id.to_string(),
                missing,
                failed,
            });
        }

        let mut criterion_scores = BTreeMap::new();
        let mut ordered = Vec::with_capacity(self.criteria.len());
        let mut confidence = 0.0;
        let mut escalations = 0usize;

        for criterion in &self.criteria {
            let Some(outcome) = outcomes.get(&criterion.id) else {
                continue;
            };
            if let Some(score) = outcome.resolved_score() {
                criterion_scores.insert(criterion.id.clone(), score);
                confidence += criterion.weight * outcome.confidence();
            }
            if outcome.is_escalated() {
                escalations += 1;
            }
            ordered.push(outcome.clone());
        }

        let confidence =
            (confidence - self.escalation_penalty * escalations as f64).clamp(0.0, 1.0);

        Ok(ConsensusResult {
            item_id: item_id.to_string(),
            version,
            overall_score: self.weighted_score(&criterion_scores),
            criterion_scores,
            confidence,
            escalated: escalations > 0,
            criteria: self.report(outcomes),
            outcomes: ordered,
            computed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JudgeScore;

    fn single(criterion: &str, score: f64, confidence: f64) -> CriterionOutcome {
        CriterionOutcome::SingleJudge {
            score: JudgeScore::new("a", "plan-1", criterion, score, ""),
            confidence,
            resolved_at: Utc::now(),
        }
    }

    fn escalated(criterion: &str) -> CriterionOutcome {
        CriterionOutcome::TimedOut {
            item_id: "plan-1".into(),
            criterion_id: criterion.into(),
            scores: vec![],
            required: 2,
            waited_ms: 10,
            escalated_at: Utc::now(),
        }
    }

    fn outcomes(list: Vec<CriterionOutcome>) -> BTreeMap<String, CriterionOutcome> {
        list.into_iter()
            .map(|o| (o.criterion_id().to_string(), o))
            .collect()
    }

    #[test]
    fn test_weighted_overall_score() {
        let synth = Synthesizer::new(&ConsensusConfig::default());
        let result = synth
            .synthesize(
                "plan-1",
                1,
                &outcomes(vec![
                    single("comprehensiveness", 8.0, 0.9),
                    single("technical_specificity", 7.0, 0.9),
                    single("prioritization", 9.0, 0.9),
                    single("clarity", 6.0, 0.9),
                ]),
            )
            .unwrap();

        assert!((result.overall_score.unwrap() - 7.7).abs() < 1e-9);
        assert!((result.confidence - 0.9).abs() < 1e-9);
        assert!(!result.escalated);
        assert_eq!(result.outcomes[0].criterion_id(), "comprehensiveness");
    }

    #[test]
    fn test_missing_criterion_is_incomplete() {
        let synth = Synthesizer::new(&ConsensusConfig::default());
        let result = synth.synthesize(
            "plan-1",
            1,
            &outcomes(vec![single("comprehensiveness", 8.0, 0.9)]),
        );
        match result {
            Err(ConsensusError::IncompleteCriteria { missing, failed, .. }) => {
                assert_eq!(missing.len(), 3);
                assert!(failed.is_empty());
            }
            other => panic!("expected IncompleteCriteria, got {:?}", other),
        }
    }

    #[test]
    fn test_escalation_penalizes_and_rescales() {
        let synth = Synthesizer::new(&ConsensusConfig::default());
        let result = synth
            .synthesize(
                "plan-1",
                1,
                &outcomes(vec![
                    single("comprehensiveness", 8.0, 1.0),
                    escalated("technical_specificity"),
                    single("prioritization", 9.0, 1.0),
                    single("clarity", 6.0, 1.0),
                ]),
            )
            .unwrap();

        assert!(result.escalated);
        assert_eq!(result.escalated_criteria(), vec!["technical_specificity"]);
        // (0.4*8 + 0.2*9 + 0.1*6) / 0.7
        assert!((result.overall_score.unwrap() - 5.6 / 0.7).abs() < 1e-9);
        // 0.7 resolved weight, minus one escalation penalty
        assert!((result.confidence - 0.6).abs() < 1e-9);
        assert!(!result.criterion_scores.contains_key("technical_specificity"));
    }

    #[test]
    fn test_all_escalated_has_no_overall_score() {
        let synth = Synthesizer::new(&ConsensusConfig::default());
        let result = synth
            .synthesize(
                "plan-1",
                1,
                &outcomes(vec![
                    escalated("comprehensiveness"),
                    escalated("technical_specificity"),
                    escalated("prioritization"),
                    escalated("clarity"),
                ]),
            )
            .unwrap();
        assert_eq!(result.overall_score, None);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_report_marks_pending() {
        let synth = Synthesizer::new(&ConsensusConfig::default());
        let report = synth.report(&outcomes(vec![single("clarity", 6.0, 0.9)]));
        assert_eq!(report.len(), 4);
        assert_eq!(report[0].state, CriterionState::Pending);
        assert!(matches!(report[3].state, CriterionState::Resolved { .. }));
    }
}
