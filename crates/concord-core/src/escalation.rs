//! Human escalation: tickets for reviewers and the override ledger.
//!
//! A major disagreement (or a round that timed out) becomes a ticket carrying
//! the full score set. A reviewer's decision is recorded against the exact
//! (item, criterion, judge scores) combination and replayed whenever those
//! identical inputs are resolved again. Any change to the score set (a
//! resubmission, an extra judge) produces a different key and escalates anew.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CriterionOutcome, EscalationReason, HumanDecision, JudgeScore, RequiredAction, Resolution,
    RoundKey,
};

/// Identity of a score set for override replay.
///
/// Scores are compared bit-for-bit (with `-0.0` folded into `0.0`) and keyed
/// by judge, so arrival order never matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverrideKey {
    pub item_id: String,
    pub criterion_id: String,
    pub scores: Vec<(String, u64)>,
}

impl OverrideKey {
    pub fn from_scores(key: &RoundKey, scores: &[JudgeScore]) -> Self {
        let mut pairs: Vec<(String, u64)> = scores
            .iter()
            .map(|s| (s.judge_id.clone(), (s.score + 0.0).to_bits()))
            .collect();
        pairs.sort();
        Self {
            item_id: key.item_id.clone(),
            criterion_id: key.criterion_id.clone(),
            scores: pairs,
        }
    }

    pub fn round_key(&self) -> RoundKey {
        RoundKey::new(&self.item_id, &self.criterion_id)
    }
}

/// One recorded decision, in serializable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub key: OverrideKey,
    pub decision: HumanDecision,
}

/// Human decisions keyed by exact score set.
#[derive(Debug, Clone, Default)]
pub struct OverrideLedger {
    decisions: BTreeMap<OverrideKey, HumanDecision>,
}

impl OverrideLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision, returning the one it replaced.
    pub fn record(&mut self, key: OverrideKey, decision: HumanDecision) -> Option<HumanDecision> {
        tracing::info!(
            round = %key.round_key(),
            reviewer = %decision.reviewer,
            score = decision.score,
            "Human decision recorded"
        );
        self.decisions.insert(key, decision)
    }

    pub fn get(&self, key: &OverrideKey) -> Option<&HumanDecision> {
        self.decisions.get(key)
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn entries(&self) -> Vec<OverrideEntry> {
        self.decisions
            .iter()
            .map(|(key, decision)| OverrideEntry {
                key: key.clone(),
                decision: decision.clone(),
            })
            .collect()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = OverrideEntry>) -> Self {
        Self {
            decisions: entries
                .into_iter()
                .map(|e| (e.key, e.decision))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<OverrideEntry> = serde_json::from_str(json)?;
        Ok(Self::from_entries(entries))
    }
}

/// Everything a reviewer needs to decide an escalated round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationTicket {
    pub item_id: String,
    pub criterion_id: String,

    /// Full contributing score set, with rationales
    pub scores: Vec<JudgeScore>,

    pub reason: EscalationReason,
    pub required_action: RequiredAction,
    pub escalated_at: DateTime<Utc>,

    /// Key a decision for this ticket will be recorded under
    pub override_key: OverrideKey,
}

impl EscalationTicket {
    /// Ticket for an escalated outcome; `None` for anything else.
    pub fn from_outcome(outcome: &CriterionOutcome) -> Option<Self> {
        let key = outcome.round_key();
        match outcome {
            CriterionOutcome::Conflict { record } => match &record.resolution {
                Resolution::Escalated {
                    reason,
                    required_action,
                    escalated_at,
                } => Some(Self {
                    item_id: record.item_id.clone(),
                    criterion_id: record.criterion_id.clone(),
                    scores: record.scores.clone(),
                    reason: reason.clone(),
                    required_action: *required_action,
                    escalated_at: *escalated_at,
                    override_key: OverrideKey::from_scores(&key, &record.scores),
                }),
                _ => None,
            },
            CriterionOutcome::TimedOut {
                item_id,
                criterion_id,
                scores,
                required,
                waited_ms,
                escalated_at,
            } => Some(Self {
                item_id: item_id.clone(),
                criterion_id: criterion_id.clone(),
                scores: scores.clone(),
                reason: EscalationReason::Timeout {
                    reported: scores.len(),
                    required: *required,
                    waited_ms: *waited_ms,
                },
                required_action: RequiredAction::HumanReview,
                escalated_at: *escalated_at,
                override_key: OverrideKey::from_scores(&key, scores),
            }),
            _ => None,
        }
    }

    pub fn round_key(&self) -> RoundKey {
        RoundKey::new(&self.item_id, &self.criterion_id)
    }
}
