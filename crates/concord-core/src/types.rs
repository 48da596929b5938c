//! Core data model for consensus resolution.
//!
//! Judge scores flow in, conflict records and consensus results flow out.
//! Everything here is plain data: the algorithms live in the classifier,
//! resolver, reliability and synthesizer modules.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single judge's score for one criterion of one item.
///
/// Scores are immutable. A judge that is re-run submits a new record with a
/// newer timestamp, which supersedes the older one for the same
/// (judge, item, criterion) key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeScore {
    /// Identifier of the judge that produced the score
    pub judge_id: String,

    /// Item under evaluation (e.g. one remediation plan)
    pub item_id: String,

    /// Criterion the score applies to
    pub criterion_id: String,

    /// Numeric score on the configured scale
    pub score: f64,

    /// Free-text justification from the judge
    #[serde(default)]
    pub rationale: String,

    /// When the judge produced the score
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl JudgeScore {
    /// Create a score stamped with the current time.
    pub fn new(
        judge_id: impl Into<String>,
        item_id: impl Into<String>,
        criterion_id: impl Into<String>,
        score: f64,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            judge_id: judge_id.into(),
            item_id: item_id.into(),
            criterion_id: criterion_id.into(),
            score,
            rationale: rationale.into(),
            timestamp: Utc::now(),
        }
    }

    /// Replace the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The (item, criterion) round this score belongs to.
    pub fn round_key(&self) -> RoundKey {
        RoundKey::new(&self.item_id, &self.criterion_id)
    }

    /// Whether this score replaces `other` under the resubmission rule.
    pub fn supersedes(&self, other: &JudgeScore) -> bool {
        self.judge_id == other.judge_id
            && self.item_id == other.item_id
            && self.criterion_id == other.criterion_id
            && self.timestamp > other.timestamp
    }
}

/// Identifies one evaluation round: an (item, criterion) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundKey {
    pub item_id: String,
    pub criterion_id: String,
}

impl RoundKey {
    pub fn new(item_id: impl Into<String>, criterion_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            criterion_id: criterion_id.into(),
        }
    }
}

impl fmt::Display for RoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.item_id, self.criterion_id)
    }
}

/// Severity of disagreement between judges.
///
/// Tiers are totally ordered: `Minor < Moderate < Major < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    Minor,
    Moderate,
    Major,
    /// A major disagreement involving a judge with an active bias flag
    Critical,
}

impl fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minor => write!(f, "minor"),
            Self::Moderate => write!(f, "moderate"),
            Self::Major => write!(f, "major"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Whether a round produced a score or was handed to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Resolved,
    Escalated,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => write!(f, "resolved"),
            Self::Escalated => write!(f, "escalated"),
        }
    }
}

/// What a human has to do with an escalated round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAction {
    HumanReview,
}

/// Why automation declined to decide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    /// Judges disagreed by at least the major threshold.
    MajorDisagreement { dispersion: f64 },

    /// The round barrier expired before enough judges reported.
    Timeout {
        reported: usize,
        required: usize,
        waited_ms: u64,
    },
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MajorDisagreement { dispersion } => {
                write!(f, "major disagreement (spread {:.2})", dispersion)
            }
            Self::Timeout {
                reported,
                required,
                waited_ms,
            } => write!(
                f,
                "timed out after {}ms with {}/{} judges",
                waited_ms, reported, required
            ),
        }
    }
}

/// Direction of a judge's systematic deviation from consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasDirection {
    /// Scores consistently above consensus
    Above,
    /// Scores consistently below consensus
    Below,
}

impl BiasDirection {
    /// Direction of a signed deviation (`judge - consensus`).
    pub fn of(signed_deviation: f64) -> Self {
        if signed_deviation >= 0.0 {
            Self::Above
        } else {
            Self::Below
        }
    }
}

impl fmt::Display for BiasDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Above => write!(f, "above"),
            Self::Below => write!(f, "below"),
        }
    }
}

/// Weight a judge carried in a weighted resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeWeight {
    pub judge_id: String,

    /// Evidence quality of the judge's rationale
    pub evidence_quality: f64,

    /// Reliability multiplier applied (1.0 unless discounted)
    pub reliability: f64,

    /// Final normalized weight (weights in a round sum to 1)
    pub weight: f64,
}

/// A judge whose weight was reduced because of an active bias flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountedJudge {
    pub judge_id: String,
    pub direction: BiasDirection,
    pub reliability_weight: f64,
    pub reason: String,
}

/// A human reviewer's decision for an escalated round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanDecision {
    /// Score chosen by the reviewer
    pub score: f64,

    /// Who decided
    pub reviewer: String,

    /// Free-text notes
    #[serde(default)]
    pub notes: String,

    #[serde(default = "Utc::now")]
    pub decided_at: DateTime<Utc>,
}

impl HumanDecision {
    pub fn new(score: f64, reviewer: impl Into<String>) -> Self {
        Self {
            score,
            reviewer: reviewer.into(),
            notes: String::new(),
            decided_at: Utc::now(),
        }
    }

    /// Attach reviewer notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// How a round was resolved. Each variant carries only what its formula used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Resolution {
    /// Arithmetic mean of all scores.
    Mean,

    /// Mean weighted by evidence quality.
    EvidenceWeighted { weights: Vec<JudgeWeight> },

    /// Deferred to a human reviewer.
    Escalated {
        reason: EscalationReason,
        required_action: RequiredAction,
        escalated_at: DateTime<Utc>,
    },

    /// A recorded human decision for the identical score set was replayed.
    HumanOverride { decision: HumanDecision },

    /// Evidence-weighted mean with biased judges further discounted.
    BiasAdjusted {
        weights: Vec<JudgeWeight>,
        discounted: Vec<DiscountedJudge>,
    },
}

impl Resolution {
    /// Short stable identifier for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::EvidenceWeighted { .. } => "evidence_weighted",
            Self::Escalated { .. } => "escalated",
            Self::HumanOverride { .. } => "human_override",
            Self::BiasAdjusted { .. } => "bias_adjusted",
        }
    }
}

/// The audit record of one resolved (or escalated) round.
///
/// Always references at least two judge scores for the same round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub item_id: String,
    pub criterion_id: String,

    /// Contributing scores, ordered by judge id
    pub scores: Vec<JudgeScore>,

    /// Max pairwise absolute difference between scores
    pub dispersion: f64,

    pub tier: SeverityTier,
    pub resolution: Resolution,
    pub status: RecordStatus,

    /// Absent while escalated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_score: Option<f64>,

    /// Confidence in `resolved_score`, in [0, 1]
    pub confidence: f64,

    pub recorded_at: DateTime<Utc>,
}

impl ConflictRecord {
    pub fn round_key(&self) -> RoundKey {
        RoundKey::new(&self.item_id, &self.criterion_id)
    }

    pub fn is_escalated(&self) -> bool {
        self.status == RecordStatus::Escalated
    }

    /// Judges that contributed to this round.
    pub fn judge_ids(&self) -> impl Iterator<Item = &str> {
        self.scores.iter().map(|s| s.judge_id.as_str())
    }

    /// Escalation reason, if the round is escalated.
    pub fn escalation_reason(&self) -> Option<&EscalationReason> {
        match &self.resolution {
            Resolution::Escalated { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// The result for one criterion of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CriterionOutcome {
    /// Two or more judges reported; see the record for how they were reconciled.
    Conflict { record: ConflictRecord },

    /// Only one judge reported; its score passes through with discounted confidence.
    SingleJudge {
        score: JudgeScore,
        confidence: f64,
        resolved_at: DateTime<Utc>,
    },

    /// The barrier expired with fewer than two scores.
    TimedOut {
        item_id: String,
        criterion_id: String,
        scores: Vec<JudgeScore>,
        required: usize,
        waited_ms: u64,
        escalated_at: DateTime<Utc>,
    },

    /// The round was rejected (e.g. an out-of-range score).
    Failed {
        item_id: String,
        criterion_id: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
}

impl CriterionOutcome {
    pub fn item_id(&self) -> &str {
        match self {
            Self::Conflict { record } => &record.item_id,
            Self::SingleJudge { score, .. } => &score.item_id,
            Self::TimedOut { item_id, .. } | Self::Failed { item_id, .. } => item_id,
        }
    }

    pub fn criterion_id(&self) -> &str {
        match self {
            Self::Conflict { record } => &record.criterion_id,
            Self::SingleJudge { score, .. } => &score.criterion_id,
            Self::TimedOut { criterion_id, .. } | Self::Failed { criterion_id, .. } => {
                criterion_id
            }
        }
    }

    pub fn round_key(&self) -> RoundKey {
        RoundKey::new(self.item_id(), self.criterion_id())
    }

    /// Resolved score, if automation (or a replayed human decision) produced one.
    pub fn resolved_score(&self) -> Option<f64> {
        match self {
            Self::Conflict { record } => record.resolved_score,
            Self::SingleJudge { score, .. } => Some(score.score),
            Self::TimedOut { .. } | Self::Failed { .. } => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::Conflict { record } => record.confidence,
            Self::SingleJudge { confidence, .. } => *confidence,
            Self::TimedOut { .. } | Self::Failed { .. } => 0.0,
        }
    }

    pub fn is_escalated(&self) -> bool {
        match self {
            Self::Conflict { record } => record.is_escalated(),
            Self::TimedOut { .. } => true,
            _ => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Scores that fed this outcome.
    pub fn scores(&self) -> &[JudgeScore] {
        match self {
            Self::Conflict { record } => &record.scores,
            Self::SingleJudge { score, .. } => std::slice::from_ref(score),
            Self::TimedOut { scores, .. } => scores,
            Self::Failed { .. } => &[],
        }
    }

    pub fn record(&self) -> Option<&ConflictRecord> {
        match self {
            Self::Conflict { record } => Some(record),
            _ => None,
        }
    }

    /// Condensed per-criterion state for reports.
    pub fn state(&self) -> CriterionState {
        match self {
            Self::Conflict { record } => match (record.status, record.resolved_score) {
                (RecordStatus::Resolved, Some(score)) => CriterionState::Resolved {
                    score,
                    confidence: record.confidence,
                    tier: Some(record.tier),
                },
                _ => CriterionState::Escalated {
                    reason: record
                        .escalation_reason()
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "escalated".to_string()),
                },
            },
            Self::SingleJudge {
                score, confidence, ..
            } => CriterionState::Resolved {
                score: score.score,
                confidence: *confidence,
                tier: None,
            },
            Self::TimedOut {
                scores,
                required,
                waited_ms,
                ..
            } => CriterionState::Escalated {
                reason: EscalationReason::Timeout {
                    reported: scores.len(),
                    required: *required,
                    waited_ms: *waited_ms,
                }
                .to_string(),
            },
            Self::Failed { error, .. } => CriterionState::Failed {
                error: error.clone(),
            },
        }
    }
}

/// Per-criterion state as shown to report consumers and reviewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CriterionState {
    /// No outcome yet
    Pending,

    Resolved {
        score: f64,
        confidence: f64,
        /// Absent for single-judge pass-through
        #[serde(skip_serializing_if = "Option::is_none")]
        tier: Option<SeverityTier>,
    },

    Escalated { reason: String },

    Failed { error: String },
}

/// One line of a per-item report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionReport {
    pub criterion_id: String,
    pub weight: f64,
    pub state: CriterionState,
}

/// The final, versioned multi-criterion result for one item.
///
/// Read-only for downstream consumers. Resubmissions produce a new version;
/// earlier versions are retained by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub item_id: String,

    /// Starts at 1 and increases with every recomputation that changed inputs
    pub version: u32,

    /// Resolved score per criterion (escalated criteria are absent)
    pub criterion_scores: BTreeMap<String, f64>,

    /// Weighted score across criteria; provisional when `escalated` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,

    /// Aggregate confidence in [0, 1]
    pub confidence: f64,

    /// True if any criterion awaits human review
    pub escalated: bool,

    /// Per-criterion status, in configured criterion order
    pub criteria: Vec<CriterionReport>,

    /// Contributing outcomes, in configured criterion order
    pub outcomes: Vec<CriterionOutcome>,

    pub computed_at: DateTime<Utc>,
}

impl ConsensusResult {
    /// Conflict records that contributed to this result.
    pub fn records(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.outcomes.iter().filter_map(CriterionOutcome::record)
    }

    /// Criteria waiting on a human.
    pub fn escalated_criteria(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_escalated())
            .map(CriterionOutcome::criterion_id)
            .collect()
    }
}

/// Partial view of an item that may not be finalizable yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStatus {
    pub item_id: String,
    pub cancelled: bool,
    pub criteria: Vec<CriterionReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<u32>,
}

impl ItemStatus {
    /// Every criterion has a resolved or escalated outcome.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self.criteria.iter().all(|c| {
                matches!(
                    c.state,
                    CriterionState::Resolved { .. } | CriterionState::Escalated { .. }
                )
            })
    }

    pub fn pending(&self) -> Vec<&str> {
        self.criteria
            .iter()
            .filter(|c| matches!(c.state, CriterionState::Pending))
            .map(|c| c.criterion_id.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.criteria
            .iter()
            .filter(|c| matches!(c.state, CriterionState::Failed { .. }))
            .map(|c| c.criterion_id.as_str())
            .collect()
    }

    pub fn escalated(&self) -> Vec<&str> {
        self.criteria
            .iter()
            .filter(|c| matches!(c.state, CriterionState::Escalated { .. }))
            .map(|c| c.criterion_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_tier_ordering() {
        assert!(SeverityTier::Minor < SeverityTier::Moderate);
        assert!(SeverityTier::Moderate < SeverityTier::Major);
        assert!(SeverityTier::Major < SeverityTier::Critical);
    }

    #[test]
    fn test_newer_score_supersedes() {
        let old = JudgeScore::new("a", "plan-1", "clarity", 7.0, "");
        let new = old.clone().at(old.timestamp + Duration::seconds(5));

        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
        assert!(!old.supersedes(&old));
    }

    #[test]
    fn test_other_judge_never_supersedes() {
        let a = JudgeScore::new("a", "plan-1", "clarity", 7.0, "");
        let b = JudgeScore::new("b", "plan-1", "clarity", 7.0, "")
            .at(a.timestamp + Duration::seconds(5));
        assert!(!b.supersedes(&a));
    }

    #[test]
    fn test_score_deserializes_without_timestamp() {
        let json = r#"{"judge_id":"a","item_id":"p","criterion_id":"c","score":4.5}"#;
        let score: JudgeScore = serde_json::from_str(json).unwrap();
        assert_eq!(score.score, 4.5);
        assert!(score.rationale.is_empty());
    }

    #[test]
    fn test_resolution_tagging() {
        let json = serde_json::to_value(Resolution::Mean).unwrap();
        assert_eq!(json["strategy"], "mean");
    }

    #[test]
    fn test_timed_out_outcome_is_escalated() {
        let outcome = CriterionOutcome::TimedOut {
            item_id: "p".into(),
            criterion_id: "c".into(),
            scores: vec![],
            required: 3,
            waited_ms: 500,
            escalated_at: Utc::now(),
        };
        assert!(outcome.is_escalated());
        assert_eq!(outcome.resolved_score(), None);
        assert!(matches!(outcome.state(), CriterionState::Escalated { .. }));
    }

    #[test]
    fn test_round_key_display() {
        assert_eq!(RoundKey::new("plan-1", "clarity").to_string(), "plan-1/clarity");
    }
}
