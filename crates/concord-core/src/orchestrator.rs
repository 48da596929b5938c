//! Per-item accumulation and versioned results.
//!
//! The orchestrator holds the current outcome for every (item, criterion),
//! the full audit trail of outcomes ever produced, and every result version
//! emitted. Results are immutable once emitted: recomputing after an input
//! change appends a new version, recomputing without one returns the latest.

use std::collections::BTreeMap;

use crate::config::ConsensusConfig;
use crate::escalation::EscalationTicket;
use crate::resolver::ResolutionError;
use crate::synthesizer::Synthesizer;
use crate::types::{ConsensusResult, CriterionOutcome, ItemStatus};
use crate::ConsensusError;

#[derive(Debug, Default)]
struct ItemState {
    current: BTreeMap<String, CriterionOutcome>,
    trail: Vec<CriterionOutcome>,
    results: Vec<ConsensusResult>,
    /// Bumped whenever the current outcome of a criterion changes
    revision: u64,
    /// Revision the latest result was computed from
    finalized_revision: Option<u64>,
    cancelled: bool,
}

pub struct ConsensusOrchestrator {
    synthesizer: Synthesizer,
    items: BTreeMap<String, ItemState>,
}

impl ConsensusOrchestrator {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            synthesizer: Synthesizer::new(config),
            items: BTreeMap::new(),
        }
    }

    /// Record an outcome as the current one for its criterion.
    ///
    /// Outcomes for a cancelled item are kept in the audit trail only. An
    /// outcome with the same scores and state as the current one is trailed
    /// but does not count as a change.
    pub fn record(&mut self, outcome: CriterionOutcome) -> Result<(), ConsensusError> {
        let criterion_id = outcome.criterion_id().to_string();
        if !self
            .synthesizer
            .criteria()
            .iter()
            .any(|c| c.id == criterion_id)
        {
            return Err(ResolutionError::UnknownCriterion(criterion_id).into());
        }

        let state = self.items.entry(outcome.item_id().to_string()).or_default();
        state.trail.push(outcome.clone());
        if state.cancelled {
            tracing::debug!(
                item = outcome.item_id(),
                criterion = %criterion_id,
                "Outcome kept for audit only; item cancelled"
            );
            return Ok(());
        }
        let changed = state
            .current
            .get(&criterion_id)
            .map_or(true, |current| !same_result(current, &outcome));
        state.current.insert(criterion_id, outcome);
        if changed {
            state.revision += 1;
        }
        Ok(())
    }

    /// Keep an outcome in the audit trail without making it current.
    pub fn archive(&mut self, outcome: CriterionOutcome) {
        self.items
            .entry(outcome.item_id().to_string())
            .or_default()
            .trail
            .push(outcome);
    }

    /// Whether every criterion of the item has a resolved or escalated outcome.
    pub fn is_complete(&self, item_id: &str) -> bool {
        self.items.get(item_id).is_some_and(|state| {
            !state.cancelled
                && self.synthesizer.criteria().iter().all(|c| {
                    state
                        .current
                        .get(&c.id)
                        .is_some_and(|o| !o.is_failed())
                })
        })
    }

    /// Whether the current outcomes differ from the latest emitted result.
    pub fn has_unemitted_changes(&self, item_id: &str) -> bool {
        self.items
            .get(item_id)
            .is_some_and(|s| s.finalized_revision != Some(s.revision))
    }

    /// Produce the item's result.
    ///
    /// Appends a new version when outcomes changed since the last one,
    /// otherwise returns the latest version unchanged.
    pub fn finalize(&mut self, item_id: &str) -> Result<ConsensusResult, ConsensusError> {
        let state = self
            .items
            .get_mut(item_id)
            .ok_or_else(|| ConsensusError::UnknownItem(item_id.to_string()))?;

        if state.cancelled {
            return Err(ConsensusError::Cancelled(item_id.to_string()));
        }

        if state.finalized_revision == Some(state.revision) {
            if let Some(latest) = state.results.last() {
                return Ok(latest.clone());
            }
        }

        let version = u32::try_from(state.results.len() + 1).unwrap_or(u32::MAX);
        let result = self
            .synthesizer
            .synthesize(item_id, version, &state.current)?;

        tracing::info!(
            item = item_id,
            version = result.version,
            overall = ?result.overall_score,
            confidence = result.confidence,
            escalated = result.escalated,
            "Consensus result emitted"
        );

        state.results.push(result.clone());
        state.finalized_revision = Some(state.revision);
        Ok(result)
    }

    /// Partial view of an item.
    pub fn status(&self, item_id: &str) -> Option<ItemStatus> {
        self.items.get(item_id).map(|state| ItemStatus {
            item_id: item_id.to_string(),
            cancelled: state.cancelled,
            criteria: self.synthesizer.report(&state.current),
            latest_version: state.results.last().map(|r| r.version),
        })
    }

    /// Stop producing results for an item. Already recorded outcomes remain
    /// in the audit trail.
    pub fn cancel(&mut self, item_id: &str) {
        let state = self.items.entry(item_id.to_string()).or_default();
        if !state.cancelled {
            tracing::info!(
                item = item_id,
                recorded = state.trail.len(),
                "Item cancelled"
            );
        }
        state.cancelled = true;
    }

    pub fn is_cancelled(&self, item_id: &str) -> bool {
        self.items.get(item_id).is_some_and(|s| s.cancelled)
    }

    pub fn outcome(&self, item_id: &str, criterion_id: &str) -> Option<&CriterionOutcome> {
        self.items.get(item_id)?.current.get(criterion_id)
    }

    /// Every result version emitted for an item, oldest first.
    pub fn history(&self, item_id: &str) -> &[ConsensusResult] {
        self.items
            .get(item_id)
            .map(|s| s.results.as_slice())
            .unwrap_or(&[])
    }

    pub fn latest(&self, item_id: &str) -> Option<&ConsensusResult> {
        self.items.get(item_id)?.results.last()
    }

    /// Every outcome ever recorded for an item, in arrival order.
    pub fn audit_trail(&self, item_id: &str) -> &[CriterionOutcome] {
        self.items
            .get(item_id)
            .map(|s| s.trail.as_slice())
            .unwrap_or(&[])
    }

    /// Open escalations across all live items.
    pub fn pending_escalations(&self) -> Vec<EscalationTicket> {
        self.items
            .values()
            .filter(|s| !s.cancelled)
            .flat_map(|s| s.current.values())
            .filter_map(EscalationTicket::from_outcome)
            .collect()
    }

    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }
}

/// Same inputs and same state, ignoring when either was produced.
fn same_result(a: &CriterionOutcome, b: &CriterionOutcome) -> bool {
    a.scores() == b.scores() && a.state() == b.state()
}
