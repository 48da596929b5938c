//! Owned reliability store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::{BiasTransition, JudgeProfile, ReliabilityConfig};
use super::{round_deviations, ReliabilityView};
use crate::types::{BiasDirection, ConflictRecord};

/// Serializable point-in-time copy of every judge profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub profiles: Vec<JudgeProfile>,
}

impl LedgerSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Reliability profiles for every judge seen so far.
///
/// Single-owner store for synchronous callers. The runtime wraps the same
/// profiles behind per-judge locks instead.
#[derive(Debug, Clone, Default)]
pub struct ReliabilityLedger {
    config: ReliabilityConfig,
    profiles: BTreeMap<String, JudgeProfile>,
}

impl ReliabilityLedger {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self {
            config,
            profiles: BTreeMap::new(),
        }
    }

    /// Rebuild a ledger from a snapshot. Weights are recomputed under `config`.
    pub fn restore(config: ReliabilityConfig, snapshot: LedgerSnapshot) -> Self {
        let profiles = snapshot
            .profiles
            .into_iter()
            .map(|mut profile| {
                profile.recompute(&config);
                (profile.judge_id().to_string(), profile)
            })
            .collect();
        Self { config, profiles }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            taken_at: Utc::now(),
            profiles: self.profiles.values().cloned().collect(),
        }
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    pub fn profile(&self, judge_id: &str) -> Option<&JudgeProfile> {
        self.profiles.get(judge_id)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &JudgeProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Fold a finished round into the contributing judges' profiles.
    ///
    /// Escalated rounds register the judges but teach nothing about them.
    pub fn record_round(&mut self, record: &ConflictRecord) -> Vec<(String, BiasTransition)> {
        let mut transitions = Vec::new();

        let Some(deviations) = round_deviations(record) else {
            for judge_id in record.judge_ids() {
                self.profiles
                    .entry(judge_id.to_string())
                    .or_insert_with(|| JudgeProfile::new(judge_id));
            }
            return transitions;
        };

        for (judge_id, deviation) in deviations {
            if let Some(transition) = self.observe(judge_id, deviation) {
                transitions.push((judge_id.to_string(), transition));
            }
        }
        transitions
    }

    /// Record one signed deviation for a judge, creating its profile if needed.
    pub fn observe(&mut self, judge_id: &str, signed_deviation: f64) -> Option<BiasTransition> {
        let profile = self
            .profiles
            .entry(judge_id.to_string())
            .or_insert_with(|| JudgeProfile::new(judge_id));
        let transition = profile.observe(signed_deviation, &self.config);
        if let Some(transition) = transition {
            log_transition(profile, transition);
        }
        transition
    }

    /// Administrative reset of one judge. Returns false for unknown judges.
    pub fn reset(&mut self, judge_id: &str) -> bool {
        match self.profiles.get_mut(judge_id) {
            Some(profile) => {
                profile.reset();
                tracing::info!(judge = judge_id, resets = profile.resets(), "Judge profile reset");
                true
            }
            None => false,
        }
    }

    /// Judges currently carrying a bias flag.
    pub fn biased_judges(&self) -> Vec<(&str, BiasDirection)> {
        self.profiles
            .values()
            .filter_map(|p| p.bias().map(|b| (p.judge_id(), b)))
            .collect()
    }
}

impl ReliabilityView for ReliabilityLedger {
    fn reliability_weight(&self, judge_id: &str) -> f64 {
        self.profiles
            .get(judge_id)
            .map(JudgeProfile::reliability_weight)
            .unwrap_or(1.0)
    }

    fn bias(&self, judge_id: &str) -> Option<BiasDirection> {
        self.profiles.get(judge_id).and_then(JudgeProfile::bias)
    }
}

/// Emit the log event for a bias flag change.
pub fn log_transition(profile: &JudgeProfile, transition: BiasTransition) {
    match transition {
        BiasTransition::Flagged(direction) | BiasTransition::Reversed(direction) => {
            tracing::warn!(
                judge = profile.judge_id(),
                direction = %direction,
                signed_deviation = profile.signed_deviation(),
                "Judge flagged for systematic bias"
            );
        }
        BiasTransition::Cleared => {
            tracing::info!(judge = profile.judge_id(), "Judge bias flag cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JudgeScore, RecordStatus, Resolution, SeverityTier};

    fn record(scores: &[(&str, f64)], resolved: Option<f64>) -> ConflictRecord {
        ConflictRecord {
            item_id: "plan-1".into(),
            criterion_id: "clarity".into(),
            scores: scores
                .iter()
                .map(|(j, s)| JudgeScore::new(*j, "plan-1", "clarity", *s, ""))
                .collect(),
            dispersion: 0.0,
            tier: SeverityTier::Minor,
            resolution: Resolution::Mean,
            status: if resolved.is_some() {
                RecordStatus::Resolved
            } else {
                RecordStatus::Escalated
            },
            resolved_score: resolved,
            confidence: 0.9,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_unknown_judge_is_neutral() {
        let ledger = ReliabilityLedger::default();
        assert_eq!(ledger.reliability_weight("nobody"), 1.0);
        assert_eq!(ledger.bias("nobody"), None);
    }

    #[test]
    fn test_record_round_updates_each_judge() {
        let mut ledger = ReliabilityLedger::default();
        ledger.record_round(&record(&[("a", 8.0), ("b", 6.0)], Some(7.0)));

        let a = ledger.profile("a").unwrap();
        let b = ledger.profile("b").unwrap();
        assert_eq!(a.rounds(), 1);
        assert_eq!(a.signed_deviation(), 1.0);
        assert_eq!(b.signed_deviation(), -1.0);
    }

    #[test]
    fn test_escalated_round_registers_without_observing() {
        let mut ledger = ReliabilityLedger::default();
        ledger.record_round(&record(&[("a", 2.0), ("b", 9.0)], None));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.profile("a").unwrap().rounds(), 0);
    }

    #[test]
    fn test_bias_transition_reported() {
        let mut ledger = ReliabilityLedger::default();
        let mut flagged = Vec::new();
        for _ in 0..3 {
            flagged.extend(ledger.record_round(&record(&[("a", 9.0), ("b", 4.0)], Some(4.0))));
        }
        assert_eq!(
            flagged,
            vec![("a".to_string(), BiasTransition::Flagged(BiasDirection::Above))]
        );
        assert_eq!(ledger.biased_judges(), vec![("a", BiasDirection::Above)]);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut ledger = ReliabilityLedger::default();
        for _ in 0..4 {
            ledger.record_round(&record(&[("a", 8.0), ("b", 6.0)], Some(7.0)));
        }
        let json = ledger.snapshot().to_json().unwrap();
        let restored =
            ReliabilityLedger::restore(ReliabilityConfig::default(), LedgerSnapshot::from_json(&json).unwrap());

        assert_eq!(restored.len(), 2);
        assert_eq!(
            restored.profile("a").unwrap(),
            ledger.profile("a").unwrap()
        );
    }

    #[test]
    fn test_restore_recomputes_under_new_config() {
        let mut ledger = ReliabilityLedger::default();
        for _ in 0..4 {
            ledger.record_round(&record(&[("a", 8.0), ("b", 6.0)], Some(7.0)));
        }
        let strict = ReliabilityConfig {
            cold_start_rounds: 10,
            ..ReliabilityConfig::default()
        };
        let restored = ReliabilityLedger::restore(strict, ledger.snapshot());
        assert_eq!(restored.reliability_weight("a"), 1.0);
        assert!(ledger.reliability_weight("a") < 1.0);
    }

    #[test]
    fn test_reset() {
        let mut ledger = ReliabilityLedger::default();
        for _ in 0..4 {
            ledger.record_round(&record(&[("a", 8.0), ("b", 6.0)], Some(7.0)));
        }
        assert!(ledger.reset("a"));
        assert!(!ledger.reset("zed"));
        assert_eq!(ledger.reliability_weight("a"), 1.0);
        assert_eq!(ledger.profile("a").unwrap().resets(), 1);
    }
}
