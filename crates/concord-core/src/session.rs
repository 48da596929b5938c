//! Synchronous consensus session.
//!
//! `ConsensusSession` wires the pieces together for single-threaded callers
//! (batch jobs, the CLI, tests): scores are submitted, rounds are closed
//! explicitly, and every resolution feeds the reliability ledger before the
//! next round is classified.
//!
//! ```rust,ignore
//! let mut session = ConsensusSession::new(ConsensusConfig::default())?;
//! for score in scores {
//!     session.submit(score)?;
//! }
//! for (item, result) in session.resolve_all() {
//!     println!("{item}: {:?}", result.map(|r| r.overall_score));
//! }
//! ```

use std::time::Duration;

use chrono::Utc;

use crate::config::{ConfigError, ConsensusConfig};
use crate::escalation::{EscalationTicket, OverrideLedger};
use crate::intake::{ScoreBook, Submission};
use crate::orchestrator::ConsensusOrchestrator;
use crate::reliability::ReliabilityLedger;
use crate::resolver::{ResolutionError, Resolver};
use crate::types::{
    ConsensusResult, CriterionOutcome, EscalationReason, HumanDecision, ItemStatus, JudgeScore,
    RoundKey,
};
use crate::ConsensusError;

pub struct ConsensusSession {
    config: ConsensusConfig,
    resolver: Resolver,
    book: ScoreBook,
    ledger: ReliabilityLedger,
    overrides: OverrideLedger,
    orchestrator: ConsensusOrchestrator,
}

impl ConsensusSession {
    pub fn new(config: ConsensusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            resolver: Resolver::new(&config)?,
            ledger: ReliabilityLedger::new(config.reliability.clone()),
            orchestrator: ConsensusOrchestrator::new(&config),
            book: ScoreBook::new(),
            overrides: OverrideLedger::new(),
            config,
        })
    }

    /// Start from an existing reliability ledger.
    pub fn with_ledger(mut self, ledger: ReliabilityLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Start from previously recorded human decisions.
    pub fn with_overrides(mut self, overrides: OverrideLedger) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn ledger(&self) -> &ReliabilityLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut ReliabilityLedger {
        &mut self.ledger
    }

    pub fn overrides(&self) -> &OverrideLedger {
        &self.overrides
    }

    pub fn orchestrator(&self) -> &ConsensusOrchestrator {
        &self.orchestrator
    }

    /// Accept a judge score for a later round.
    pub fn submit(&mut self, score: JudgeScore) -> Result<Submission, ConsensusError> {
        if self.config.criterion(&score.criterion_id).is_none() {
            return Err(ResolutionError::UnknownCriterion(score.criterion_id).into());
        }
        if self.orchestrator.is_cancelled(&score.item_id) {
            return Err(ConsensusError::Cancelled(score.item_id));
        }
        Ok(self.book.submit(score))
    }

    /// Close a round with whatever scores it has and resolve it.
    ///
    /// A rejected round is recorded as failed for its criterion and the
    /// error is returned; other rounds of the item are unaffected. A round
    /// whose held scores already produced the current outcome returns that
    /// outcome without feeding the ledger again.
    #[tracing::instrument(skip(self))]
    pub fn resolve_criterion(
        &mut self,
        item_id: &str,
        criterion_id: &str,
    ) -> Result<CriterionOutcome, ConsensusError> {
        let key = RoundKey::new(item_id, criterion_id);
        if self.config.criterion(criterion_id).is_none() {
            return Err(ResolutionError::UnknownCriterion(criterion_id.to_string()).into());
        }
        if self.orchestrator.is_cancelled(item_id) {
            return Err(ConsensusError::Cancelled(item_id.to_string()));
        }

        let scores = self.book.scores(&key);
        if let Some(current) = self.unchanged(&key, &scores) {
            return Ok(current);
        }
        let attempt = match scores.as_slice() {
            [] => return Err(ConsensusError::NoScores(key)),
            [lone] => self.resolver.single_judge(lone),
            _ => self
                .resolver
                .resolve(&scores, &self.ledger, &self.overrides)
                .map(|record| CriterionOutcome::Conflict { record }),
        };

        self.settle(key, attempt)
    }

    /// Resolve an item's rounds whose barrier expired after `waited`.
    ///
    /// Rounds already meeting the judge count resolve normally; short rounds
    /// are escalated as timed out.
    pub fn expire(
        &mut self,
        item_id: &str,
        criterion_id: &str,
        waited: Duration,
    ) -> Result<CriterionOutcome, ConsensusError> {
        let key = RoundKey::new(item_id, criterion_id);
        let required = self
            .config
            .required_judges(criterion_id)
            .ok_or_else(|| ResolutionError::UnknownCriterion(criterion_id.to_string()))?;

        if self.book.reported(&key) >= required {
            return self.resolve_criterion(item_id, criterion_id);
        }
        if self.orchestrator.is_cancelled(item_id) {
            return Err(ConsensusError::Cancelled(item_id.to_string()));
        }

        let scores = self.book.scores(&key);
        if let Some(current @ CriterionOutcome::TimedOut { .. }) =
            self.unchanged(&key, &scores)
        {
            return Ok(current);
        }
        let attempt = self
            .resolver
            .timed_out(&key, &scores, required, waited, &self.overrides);
        self.settle(key, attempt)
    }

    /// Resolve every round of an item that has scores.
    ///
    /// Rounds whose scores have not changed since they were resolved are
    /// left as they are. Failed rounds are recorded per criterion; the returned status shows
    /// what is resolved, escalated, failed or still pending.
    pub fn resolve_item(&mut self, item_id: &str) -> Result<ItemStatus, ConsensusError> {
        let rounds = self.book.rounds_for_item(item_id);
        if rounds.is_empty() && self.orchestrator.status(item_id).is_none() {
            return Err(ConsensusError::UnknownItem(item_id.to_string()));
        }

        for key in rounds {
            match self.resolve_criterion(&key.item_id, &key.criterion_id) {
                Ok(_) | Err(ConsensusError::Resolution(_)) => {}
                Err(other) => return Err(other),
            }
        }

        self.orchestrator
            .status(item_id)
            .ok_or_else(|| ConsensusError::UnknownItem(item_id.to_string()))
    }

    /// Resolve and finalize every item with submitted scores.
    pub fn resolve_all(&mut self) -> Vec<(String, Result<ConsensusResult, ConsensusError>)> {
        let items: Vec<String> = self.book.items().into_iter().collect();
        items
            .into_iter()
            .map(|item_id| {
                let result = self
                    .resolve_item(&item_id)
                    .and_then(|_| self.orchestrator.finalize(&item_id));
                (item_id, result)
            })
            .collect()
    }

    pub fn finalize(&mut self, item_id: &str) -> Result<ConsensusResult, ConsensusError> {
        self.orchestrator.finalize(item_id)
    }

    pub fn status(&self, item_id: &str) -> Option<ItemStatus> {
        self.orchestrator.status(item_id)
    }

    pub fn history(&self, item_id: &str) -> &[ConsensusResult] {
        self.orchestrator.history(item_id)
    }

    pub fn audit_trail(&self, item_id: &str) -> &[CriterionOutcome] {
        self.orchestrator.audit_trail(item_id)
    }

    pub fn cancel(&mut self, item_id: &str) {
        self.orchestrator.cancel(item_id);
    }

    pub fn pending_escalations(&self) -> Vec<EscalationTicket> {
        self.orchestrator.pending_escalations()
    }

    /// Record a reviewer's decision for an escalated round and re-resolve it.
    ///
    /// The decision is replayed for any later round with the identical score
    /// set. Returns the new outcome; the escalated one stays in the audit trail.
    pub fn submit_decision(
        &mut self,
        item_id: &str,
        criterion_id: &str,
        decision: HumanDecision,
    ) -> Result<CriterionOutcome, ConsensusError> {
        let key = RoundKey::new(item_id, criterion_id);
        let ticket = self
            .orchestrator
            .outcome(item_id, criterion_id)
            .and_then(EscalationTicket::from_outcome)
            .ok_or_else(|| ConsensusError::NoEscalation(key.clone()))?;

        self.resolver.check_decision(&key, &decision)?;
        if ticket.scores.len() < 2 {
            return Err(ResolutionError::InsufficientJudges {
                key,
                count: ticket.scores.len(),
            }
            .into());
        }

        self.overrides.record(ticket.override_key.clone(), decision);
        let reason: EscalationReason = ticket.reason.clone();
        let attempt = self
            .resolver
            .escalate_round(&key, &ticket.scores, reason, &self.overrides)
            .map(|record| CriterionOutcome::Conflict { record });
        self.settle(key, attempt)
    }

    /// Administrative reset of a judge's reliability history.
    pub fn reset_judge(&mut self, judge_id: &str) -> bool {
        self.ledger.reset(judge_id)
    }

    /// Current outcome of a round, if it was produced from exactly `scores`.
    fn unchanged(&self, key: &RoundKey, scores: &[JudgeScore]) -> Option<CriterionOutcome> {
        self.orchestrator
            .outcome(&key.item_id, &key.criterion_id)
            .filter(|current| !current.is_failed() && current.scores() == scores)
            .cloned()
    }

    /// Feed a finished round to the ledger and the orchestrator.
    fn settle(
        &mut self,
        key: RoundKey,
        attempt: Result<CriterionOutcome, ResolutionError>,
    ) -> Result<CriterionOutcome, ConsensusError> {
        match attempt {
            Ok(outcome) => {
                if let Some(record) = outcome.record() {
                    self.ledger.record_round(record);
                }
                self.orchestrator.record(outcome.clone())?;
                Ok(outcome)
            }
            Err(error) => {
                tracing::warn!(round = %key, error = %error, "Round rejected");
                self.orchestrator.record(CriterionOutcome::Failed {
                    item_id: key.item_id,
                    criterion_id: key.criterion_id,
                    error: error.to_string(),
                    failed_at: Utc::now(),
                })?;
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CriterionState, RecordStatus, SeverityTier};

    fn two_criteria() -> ConsensusConfig {
        ConsensusConfig::from_yaml(
            "criteria:\n  - id: accuracy\n    weight: 0.6\n  - id: tone\n    weight: 0.4\n",
        )
        .unwrap()
    }

    fn score(judge: &str, criterion: &str, value: f64) -> JudgeScore {
        JudgeScore::new(judge, "plan-1", criterion, value, "")
    }

    #[test]
    fn test_full_item_resolves() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        for s in [
            score("a", "accuracy", 8.0),
            score("b", "accuracy", 8.4),
            score("a", "tone", 6.0),
            score("b", "tone", 6.0),
        ] {
            session.submit(s).unwrap();
        }

        let results = session.resolve_all();
        assert_eq!(results.len(), 1);
        let result = results[0].1.as_ref().unwrap();
        assert!((result.overall_score.unwrap() - (0.6 * 8.2 + 0.4 * 6.0)).abs() < 1e-9);
        assert_eq!(result.version, 1);
    }

    #[test]
    fn test_unknown_criterion_rejected_on_submit() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        let result = session.submit(score("a", "style", 5.0));
        assert!(matches!(
            result,
            Err(ConsensusError::Resolution(ResolutionError::UnknownCriterion(_)))
        ));
    }

    #[test]
    fn test_invalid_score_fails_only_its_round() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        session.submit(score("a", "accuracy", 8.0)).unwrap();
        session.submit(score("b", "accuracy", 42.0)).unwrap();
        session.submit(score("a", "tone", 6.0)).unwrap();
        session.submit(score("b", "tone", 6.5)).unwrap();

        let status = session.resolve_item("plan-1").unwrap();
        assert_eq!(status.failed(), vec!["accuracy"]);
        assert!(matches!(
            status.criteria[1].state,
            CriterionState::Resolved { .. }
        ));
        assert!(matches!(
            session.finalize("plan-1"),
            Err(ConsensusError::IncompleteCriteria { .. })
        ));
    }

    #[test]
    fn test_decision_resolves_escalation_and_bumps_version() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        session.submit(score("a", "accuracy", 6.0)).unwrap();
        session.submit(score("b", "accuracy", 9.5)).unwrap();
        session.submit(score("a", "tone", 7.0)).unwrap();
        session.submit(score("b", "tone", 7.0)).unwrap();

        let results = session.resolve_all();
        let v1 = results[0].1.as_ref().unwrap().clone();
        assert!(v1.escalated);
        assert_eq!(session.pending_escalations().len(), 1);

        let outcome = session
            .submit_decision("plan-1", "accuracy", HumanDecision::new(8.0, "lead"))
            .unwrap();
        let record = outcome.record().unwrap();
        assert_eq!(record.status, RecordStatus::Resolved);
        assert_eq!(record.tier, SeverityTier::Major);
        assert_eq!(record.resolved_score, Some(8.0));
        assert!(session.pending_escalations().is_empty());

        let v2 = session.finalize("plan-1").unwrap();
        assert_eq!(v2.version, 2);
        assert!(!v2.escalated);
        assert_eq!(session.history("plan-1").len(), 2);
        assert_eq!(session.history("plan-1")[0], v1);
    }

    #[test]
    fn test_decision_without_escalation() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        session.submit(score("a", "tone", 7.0)).unwrap();
        session.submit(score("b", "tone", 7.0)).unwrap();
        session.resolve_criterion("plan-1", "tone").unwrap();

        let result = session.submit_decision("plan-1", "tone", HumanDecision::new(8.0, "lead"));
        assert!(matches!(result, Err(ConsensusError::NoEscalation(_))));
    }

    #[test]
    fn test_repeated_resolve_all_is_idempotent() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        let first = score("a", "tone", 7.0);
        session.submit(first.clone()).unwrap();
        session.submit(score("b", "tone", 7.5)).unwrap();
        session.submit(score("a", "accuracy", 8.0)).unwrap();
        session.submit(score("b", "accuracy", 8.0)).unwrap();
        session.resolve_all();

        // Redelivered score changes nothing
        assert!(!session.submit(first).unwrap().changed());
        let results = session.resolve_all();
        assert_eq!(results[0].1.as_ref().unwrap().version, 1);
        session.resolve_criterion("plan-1", "tone").unwrap();

        assert_eq!(session.history("plan-1").len(), 1);
        assert_eq!(session.audit_trail("plan-1").len(), 2);
        assert_eq!(session.ledger().profile("a").unwrap().rounds(), 2);
        assert_eq!(session.ledger().profile("b").unwrap().rounds(), 2);
    }

    #[test]
    fn test_failed_round_is_retried() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        session.submit(score("a", "tone", 7.0)).unwrap();
        session.submit(score("b", "tone", 42.0)).unwrap();
        assert!(session.resolve_criterion("plan-1", "tone").is_err());
        assert!(session.resolve_criterion("plan-1", "tone").is_err());
        assert_eq!(session.audit_trail("plan-1").len(), 2);
    }

    #[test]
    fn test_expire_twice_keeps_timeout() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        session.submit(score("a", "tone", 7.0)).unwrap();
        session.expire("plan-1", "tone", Duration::from_secs(60)).unwrap();
        let again = session
            .expire("plan-1", "tone", Duration::from_secs(90))
            .unwrap();
        assert!(matches!(again, CriterionOutcome::TimedOut { waited_ms: 60_000, .. }));
        assert_eq!(session.audit_trail("plan-1").len(), 1);
    }

    #[test]
    fn test_expire_short_round() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        session.submit(score("a", "tone", 7.0)).unwrap();
        let outcome = session
            .expire("plan-1", "tone", Duration::from_secs(60))
            .unwrap();
        assert!(matches!(outcome, CriterionOutcome::TimedOut { .. }));
        assert_eq!(session.pending_escalations().len(), 1);
    }

    #[test]
    fn test_expire_full_round_resolves_normally() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        session.submit(score("a", "tone", 7.0)).unwrap();
        session.submit(score("b", "tone", 7.5)).unwrap();
        let outcome = session
            .expire("plan-1", "tone", Duration::from_secs(60))
            .unwrap();
        assert_eq!(outcome.resolved_score(), Some(7.25));
    }

    #[test]
    fn test_no_scores() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        assert!(matches!(
            session.resolve_criterion("plan-1", "tone"),
            Err(ConsensusError::NoScores(_))
        ));
    }

    #[test]
    fn test_cancelled_item_rejects_scores() {
        let mut session = ConsensusSession::new(two_criteria()).unwrap();
        session.submit(score("a", "tone", 7.0)).unwrap();
        session.cancel("plan-1");
        assert!(matches!(
            session.submit(score("b", "tone", 7.0)),
            Err(ConsensusError::Cancelled(_))
        ));
    }
}
