//! Per-round barrier.
//!
//! A round collects scores from its channel until the configured number of
//! distinct judges has reported, the timeout elapses, or the item is
//! cancelled. Resubmissions follow the intake rule: a newer score from the
//! same judge replaces the held one and does not count twice.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use concord_core::{JudgeScore, RoundKey, ScoreBook, Submission};

/// How a barrier wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// Enough distinct judges reported
    Complete,
    /// The deadline passed first
    TimedOut { waited: Duration },
    /// The item was cancelled
    Cancelled,
}

pub struct RoundBarrier {
    key: RoundKey,
    required: usize,
    timeout: Duration,
    book: ScoreBook,
}

impl RoundBarrier {
    pub fn new(key: RoundKey, required: usize, timeout: Duration) -> Self {
        Self {
            key,
            required: required.max(1),
            timeout,
            book: ScoreBook::new(),
        }
    }

    /// Start with scores already known for the round.
    pub fn seeded(mut self, scores: impl IntoIterator<Item = JudgeScore>) -> Self {
        for score in scores {
            self.offer(score);
        }
        self
    }

    pub fn key(&self) -> &RoundKey {
        &self.key
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Take a score for this round. Scores for other rounds are dropped.
    pub fn offer(&mut self, score: JudgeScore) -> Submission {
        if score.round_key() != self.key {
            tracing::warn!(
                round = %self.key,
                found = %score.round_key(),
                "Dropping score routed to the wrong round"
            );
            return Submission::Stale { current: score };
        }
        self.book.submit(score)
    }

    pub fn reported(&self) -> usize {
        self.book.reported(&self.key)
    }

    pub fn is_complete(&self) -> bool {
        self.reported() >= self.required
    }

    /// Held scores, ordered by judge.
    pub fn scores(&self) -> Vec<JudgeScore> {
        self.book.scores(&self.key)
    }

    /// Wait for the round to fill.
    ///
    /// The timeout runs from the start of the wait. A closed inbox stops
    /// intake but the round still waits out its deadline.
    pub async fn wait(
        &mut self,
        inbox: &mut mpsc::Receiver<JudgeScore>,
        cancel: &mut watch::Receiver<bool>,
    ) -> BarrierOutcome {
        let started = Instant::now();
        let deadline = tokio::time::sleep_until(started + self.timeout);
        tokio::pin!(deadline);

        let mut inbox_open = true;
        let mut cancel_open = true;

        loop {
            if *cancel.borrow() {
                return BarrierOutcome::Cancelled;
            }
            if self.is_complete() {
                return BarrierOutcome::Complete;
            }

            tokio::select! {
                received = inbox.recv(), if inbox_open => match received {
                    Some(score) => {
                        self.offer(score);
                    }
                    None => inbox_open = false,
                },
                changed = cancel.changed(), if cancel_open => {
                    if changed.is_err() {
                        cancel_open = false;
                    }
                }
                _ = &mut deadline => {
                    return BarrierOutcome::TimedOut {
                        waited: started.elapsed(),
                    };
                }
            }
        }
    }
}
