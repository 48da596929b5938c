//! Score intake with resubmission handling.
//!
//! Scores are grouped by round. Within a round each judge holds at most one
//! score: a newer timestamp supersedes the held score, an older or equal one
//! is stale and ignored.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{JudgeScore, RoundKey};

/// What happened to a submitted score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Submission {
    /// First score from this judge for the round
    Accepted,
    /// Replaced an older score from the same judge
    Superseded { previous: JudgeScore },
    /// Ignored; the held score is at least as new
    Stale { current: JudgeScore },
}

impl Submission {
    /// Whether the round's score set changed.
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Stale { .. })
    }
}

/// Latest score per judge for every round.
#[derive(Debug, Clone, Default)]
pub struct ScoreBook {
    rounds: BTreeMap<RoundKey, BTreeMap<String, JudgeScore>>,
}

impl ScoreBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, score: JudgeScore) -> Submission {
        let round = self.rounds.entry(score.round_key()).or_default();

        let stale = round
            .get(&score.judge_id)
            .filter(|current| !score.supersedes(current))
            .cloned();
        if let Some(current) = stale {
            tracing::debug!(
                judge = %score.judge_id,
                round = %score.round_key(),
                "Ignoring stale resubmission"
            );
            return Submission::Stale { current };
        }

        match round.insert(score.judge_id.clone(), score) {
            Some(previous) => Submission::Superseded { previous },
            None => Submission::Accepted,
        }
    }

    /// Held scores for a round, ordered by judge id.
    pub fn scores(&self, key: &RoundKey) -> Vec<JudgeScore> {
        self.rounds
            .get(key)
            .map(|round| round.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn reported(&self, key: &RoundKey) -> usize {
        self.rounds.get(key).map(BTreeMap::len).unwrap_or(0)
    }

    /// Rounds with at least one score for an item.
    pub fn rounds_for_item(&self, item_id: &str) -> Vec<RoundKey> {
        self.rounds
            .keys()
            .filter(|k| k.item_id == item_id)
            .cloned()
            .collect()
    }

    pub fn items(&self) -> BTreeSet<String> {
        self.rounds.keys().map(|k| k.item_id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}
