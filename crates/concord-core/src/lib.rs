//! # concord-core
//!
//! Deterministic consensus resolution for panels of scoring judges.
//!
//! Several judges score the same item against weighted criteria. This crate
//! answers, per criterion:
//! - How far apart are the judges?
//! - Which score stands, and how sure are we?
//! - When must a human decide instead?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: the same scores, rationales, ledger and decisions
//!    always produce the same resolution, regardless of arrival order
//! 2. **No silent guesses**: major disagreement is never averaged away; it
//!    is escalated until a reviewer decides
//! 3. **Traceable**: every outcome keeps the scores, strategy and weights
//!    that produced it, and results are versioned rather than overwritten
//! 4. **Adaptive**: judge reliability is learned from past rounds and
//!    feeds back into later ones
//!
//! ## Example
//!
//! ```rust,ignore
//! use concord_core::{resolve_round, ConsensusConfig, JudgeScore};
//!
//! let config = ConsensusConfig::from_yaml_file("consensus.yaml")?;
//! let record = resolve_round(&config, &[
//!     JudgeScore::new("judge-a", "plan-7", "clarity", 8.0, "Meets WCAG 2.1 AA"),
//!     JudgeScore::new("judge-b", "plan-7", "clarity", 8.2, ""),
//! ])?;
//!
//! match record.resolved_score {
//!     Some(score) => println!("{}: {score:.2} ({})", record.tier, record.resolution.name()),
//!     None => println!("escalated: {}", record.escalation_reason().unwrap()),
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod escalation;
pub mod evidence;
pub mod intake;
pub mod orchestrator;
pub mod reliability;
pub mod resolver;
pub mod session;
pub mod synthesizer;
pub mod types;

// Re-export main types at crate root
pub use classifier::{Classification, ConflictClassifier};
pub use config::{
    ConfidencePolicy, ConfigError, ConsensusConfig, CriterionConfig, ScoreScale,
    SeverityThresholds,
};
pub use escalation::{EscalationTicket, OverrideEntry, OverrideKey, OverrideLedger};
pub use evidence::{EvidenceAssessor, EvidenceConfig, EvidenceQuality};
pub use intake::{ScoreBook, Submission};
pub use orchestrator::ConsensusOrchestrator;
pub use reliability::{
    BiasTransition, JudgeProfile, LedgerSnapshot, ReliabilityConfig, ReliabilityLedger,
    ReliabilityView,
};
pub use resolver::{ResolutionError, Resolver};
pub use session::ConsensusSession;
pub use synthesizer::Synthesizer;
pub use types::{
    BiasDirection, ConflictRecord, ConsensusResult, CriterionOutcome, CriterionReport,
    CriterionState, EscalationReason, HumanDecision, ItemStatus, JudgeScore, JudgeWeight,
    RecordStatus, RequiredAction, Resolution, RoundKey, SeverityTier,
};

use thiserror::Error;

/// Errors that can occur while building consensus
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(
        "Item '{item_id}' is incomplete (missing: [{}], failed: [{}])",
        missing.join(", "),
        failed.join(", ")
    )]
    IncompleteCriteria {
        item_id: String,
        missing: Vec<String>,
        failed: Vec<String>,
    },

    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error("Item '{0}' was cancelled")]
    Cancelled(String),

    #[error("No scores submitted for {0}")]
    NoScores(RoundKey),

    #[error("No open escalation for {0}")]
    NoEscalation(RoundKey),
}

impl ConsensusError {
    /// Whether more input could still turn this into a result.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Resolution(e) => e.is_recoverable(),
            Self::IncompleteCriteria { .. } | Self::NoScores(_) => true,
            _ => false,
        }
    }
}

/// Resolve a single round with a fresh reliability ledger and no recorded
/// decisions.
///
/// This is the simplest entry point. Callers that resolve many rounds should
/// use [`ConsensusSession`] so judge reliability carries across rounds.
pub fn resolve_round(
    config: &ConsensusConfig,
    scores: &[JudgeScore],
) -> Result<ConflictRecord, ConsensusError> {
    let resolver = Resolver::new(config)?;
    let ledger = ReliabilityLedger::new(config.reliability.clone());
    Ok(resolver.resolve(scores, &ledger, &OverrideLedger::new())?)
}

/// Resolve every round of one item and synthesize its result.
///
/// # Arguments
///
/// * `config` - Scale, criteria and policy
/// * `scores` - Scores for a single item, across any of its criteria
///
/// # Returns
///
/// The item's first `ConsensusResult`, or `IncompleteCriteria` when a
/// configured criterion has no scores or its round was rejected.
pub fn evaluate_item(
    config: &ConsensusConfig,
    scores: &[JudgeScore],
) -> Result<ConsensusResult, ConsensusError> {
    let first = scores.first().ok_or(ResolutionError::EmptyRound)?;
    if let Some(stray) = scores.iter().find(|s| s.item_id != first.item_id) {
        return Err(ResolutionError::MixedRound {
            expected: first.round_key(),
            found: stray.round_key(),
        }
        .into());
    }

    let item_id = first.item_id.clone();
    let mut session = ConsensusSession::new(config.clone())?;
    for score in scores {
        session.submit(score.clone())?;
    }

    session.resolve_item(&item_id)?;
    session.finalize(&item_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConsensusConfig {
        ConsensusConfig::from_yaml(
            r#"
criteria:
  - id: accuracy
    weight: 0.5
  - id: tone
    weight: 0.5
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_round_minor() {
        let record = resolve_round(
            &config(),
            &[
                JudgeScore::new("a", "plan-1", "tone", 8.0, ""),
                JudgeScore::new("b", "plan-1", "tone", 8.2, ""),
                JudgeScore::new("c", "plan-1", "tone", 8.1, ""),
            ],
        )
        .unwrap();

        assert_eq!(record.tier, SeverityTier::Minor);
        assert!((record.resolved_score.unwrap() - 8.1).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_item() {
        let result = evaluate_item(
            &config(),
            &[
                JudgeScore::new("a", "plan-1", "accuracy", 7.0, ""),
                JudgeScore::new("b", "plan-1", "accuracy", 7.0, ""),
                JudgeScore::new("a", "plan-1", "tone", 9.0, ""),
                JudgeScore::new("b", "plan-1", "tone", 9.0, ""),
            ],
        )
        .unwrap();

        assert_eq!(result.overall_score, Some(8.0));
        assert_eq!(result.version, 1);
    }

    #[test]
    fn test_evaluate_item_incomplete_is_recoverable() {
        let err = evaluate_item(
            &config(),
            &[JudgeScore::new("a", "plan-1", "accuracy", 7.0, "")],
        )
        .unwrap_err();
        assert!(matches!(err, ConsensusError::IncompleteCriteria { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_evaluate_item_rejects_mixed_items() {
        let err = evaluate_item(
            &config(),
            &[
                JudgeScore::new("a", "plan-1", "accuracy", 7.0, ""),
                JudgeScore::new("a", "plan-2", "tone", 7.0, ""),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::Resolution(ResolutionError::MixedRound { .. })
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_empty_input() {
        let err = evaluate_item(&config(), &[]).unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::Resolution(ResolutionError::EmptyRound)
        ));
    }
}
