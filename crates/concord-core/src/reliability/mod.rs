//! Judge reliability tracking and bias detection.
//!
//! Every resolved round teaches the tracker how far each contributing judge
//! sat from the consensus. Two exponentially weighted averages are kept per
//! judge:
//!
//! - `|score - resolved|`, which drives the reliability weight
//!   `1 / (1 + deviation)`, floored and capped by configuration
//! - `score - resolved`, which drives the bias flag: a run of rounds beyond
//!   the threshold flags the judge, an equal run back inside clears it
//!
//! Judges with too little history get the neutral weight 1.0. Escalated
//! rounds have no resolved score and are not observed.

mod ledger;
mod profile;

pub use ledger::{LedgerSnapshot, ReliabilityLedger};
pub use profile::{BiasTransition, JudgeProfile, ReliabilityConfig};

pub use ledger::log_transition;

use std::collections::BTreeMap;

use crate::types::{BiasDirection, ConflictRecord};

/// Read access to reliability state, consulted by the resolver.
pub trait ReliabilityView {
    /// Current reliability weight; 1.0 for judges without history.
    fn reliability_weight(&self, judge_id: &str) -> f64;

    /// Active bias flag, if any.
    fn bias(&self, judge_id: &str) -> Option<BiasDirection>;

    /// Weights for one round's participants, rescaled so the most reliable
    /// participant carries 1.0.
    fn round_weights<'a>(&self, judge_ids: &[&'a str]) -> BTreeMap<&'a str, f64> {
        let raw: Vec<(&str, f64)> = judge_ids
            .iter()
            .map(|id| (*id, self.reliability_weight(id)))
            .collect();
        let best = raw.iter().map(|(_, w)| *w).fold(0.0, f64::max);
        raw.into_iter()
            .map(|(id, w)| (id, if best > 0.0 { w / best } else { 1.0 }))
            .collect()
    }
}

/// Signed deviation of each contributing judge from the resolved score.
///
/// `None` for rounds without a resolved score.
pub fn round_deviations(record: &ConflictRecord) -> Option<Vec<(&str, f64)>> {
    if record.is_escalated() {
        return None;
    }
    let resolved = record.resolved_score?;
    Some(
        record
            .scores
            .iter()
            .map(|s| (s.judge_id.as_str(), s.score - resolved))
            .collect(),
    )
}
