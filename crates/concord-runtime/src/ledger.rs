//! Reliability ledger shared between concurrently resolving rounds.
//!
//! Each judge's profile sits behind its own lock, so rounds with disjoint
//! panels never contend. The index lock is only taken for writing when a
//! judge is seen for the first time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use concord_core::reliability::{log_transition, round_deviations};
use concord_core::{
    BiasDirection, BiasTransition, ConflictRecord, JudgeProfile, LedgerSnapshot,
    ReliabilityConfig, ReliabilityLedger, ReliabilityView,
};

pub struct SharedLedger {
    config: ReliabilityConfig,
    profiles: RwLock<HashMap<String, Arc<Mutex<JudgeProfile>>>>,
}

impl SharedLedger {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self {
            config,
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild from a snapshot, recomputing every weight under `config`.
    pub fn from_snapshot(config: ReliabilityConfig, snapshot: LedgerSnapshot) -> Self {
        let restored = ReliabilityLedger::restore(config.clone(), snapshot);
        let profiles = restored
            .profiles()
            .map(|p| (p.judge_id().to_string(), Arc::new(Mutex::new(p.clone()))))
            .collect();
        Self {
            config,
            profiles: RwLock::new(profiles),
        }
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    fn profile(&self, judge_id: &str) -> Arc<Mutex<JudgeProfile>> {
        if let Some(profile) = self.profiles.read().get(judge_id) {
            return Arc::clone(profile);
        }
        let mut index = self.profiles.write();
        Arc::clone(
            index
                .entry(judge_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(JudgeProfile::new(judge_id)))),
        )
    }

    /// Fold a finished round into its judges' profiles.
    pub fn record_round(&self, record: &ConflictRecord) -> Vec<(String, BiasTransition)> {
        let Some(deviations) = round_deviations(record) else {
            for judge_id in record.judge_ids() {
                self.profile(judge_id);
            }
            return Vec::new();
        };

        deviations
            .into_iter()
            .filter_map(|(judge_id, deviation)| {
                let profile = self.profile(judge_id);
                let mut profile = profile.lock();
                let transition = profile.observe(deviation, &self.config)?;
                log_transition(&profile, transition);
                Some((judge_id.to_string(), transition))
            })
            .collect()
    }

    /// Administrative reset of one judge. Returns false for unknown judges.
    pub fn reset(&self, judge_id: &str) -> bool {
        let Some(profile) = self.profiles.read().get(judge_id).cloned() else {
            return false;
        };
        let mut profile = profile.lock();
        profile.reset();
        tracing::info!(judge = judge_id, resets = profile.resets(), "Judge profile reset");
        true
    }

    /// Point-in-time copy of every profile.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut profiles: Vec<JudgeProfile> = self
            .profiles
            .read()
            .values()
            .map(|profile| profile.lock().clone())
            .collect();
        profiles.sort_by(|a, b| a.judge_id().cmp(b.judge_id()));
        LedgerSnapshot {
            taken_at: Utc::now(),
            profiles,
        }
    }

    pub fn profile_of(&self, judge_id: &str) -> Option<JudgeProfile> {
        self.profiles
            .read()
            .get(judge_id)
            .map(|p| p.lock().clone())
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

impl ReliabilityView for SharedLedger {
    fn reliability_weight(&self, judge_id: &str) -> f64 {
        self.profiles
            .read()
            .get(judge_id)
            .map(|p| p.lock().reliability_weight())
            .unwrap_or(1.0)
    }

    fn bias(&self, judge_id: &str) -> Option<BiasDirection> {
        self.profiles
            .read()
            .get(judge_id)
            .and_then(|p| p.lock().bias())
    }
}
