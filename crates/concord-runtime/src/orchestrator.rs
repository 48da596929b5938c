//! Runtime orchestrator for concurrent score intake.
//!
//! The orchestrator turns a stream of judge scores into versioned results:
//! - One task per open (item, criterion) round, fed through an `mpsc` channel
//! - Rounds close on the judge count, their timeout, or item cancellation
//! - Closed rounds resolve with the pure core resolver and update the shared
//!   reliability ledger
//! - A single collector task owns all per-item state, so outcomes for an item
//!   are applied one at a time and results are emitted in order

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};

use concord_core::{
    ConsensusConfig, ConsensusError, ConsensusOrchestrator, ConsensusResult, CriterionOutcome,
    EscalationTicket, EvidenceQuality, HumanDecision, ItemStatus, JudgeScore, OverrideLedger,
    ResolutionError, Resolver, RoundKey, ScoreBook,
};

use crate::barrier::{BarrierOutcome, RoundBarrier};
use crate::cache::EvidenceCache;
use crate::config::RuntimeConfig;
use crate::ledger::SharedLedger;
use crate::sink::{ResultSink, TracingSink};
use crate::RuntimeError;

/// Requests handled by the collector task.
enum Command {
    /// Outcome of round `round`; round ids grow with every opened round
    Outcome {
        round: u64,
        outcome: CriterionOutcome,
    },
    Cancel {
        item_id: String,
        reply: oneshot::Sender<()>,
    },
    Status {
        item_id: String,
        reply: oneshot::Sender<Option<ItemStatus>>,
    },
    History {
        item_id: String,
        reply: oneshot::Sender<Vec<ConsensusResult>>,
    },
    Trail {
        item_id: String,
        reply: oneshot::Sender<Vec<CriterionOutcome>>,
    },
    Escalations {
        reply: oneshot::Sender<Vec<EscalationTicket>>,
    },
    Ticket {
        key: RoundKey,
        reply: oneshot::Sender<Option<(u64, EscalationTicket)>>,
    },
}

/// Where a submitted score goes.
enum Route {
    Live(u64, mpsc::Sender<JudgeScore>),
    Opened,
    /// Already covered by the settled panel
    Stale,
}

struct OpenRound {
    id: u64,
    inbox: mpsc::Sender<JudgeScore>,
}

struct Inner {
    config: ConsensusConfig,
    runtime: RuntimeConfig,
    resolver: Resolver,
    ledger: SharedLedger,
    overrides: RwLock<OverrideLedger>,
    cache: EvidenceCache,
    rounds: Mutex<HashMap<RoundKey, OpenRound>>,
    /// Latest score per judge for every round ever opened. Seeds the round a
    /// resubmission reopens; kept for the life of the orchestrator.
    settled: Mutex<ScoreBook>,
    /// Cancel signal per item with open rounds
    cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
    /// Kept for the life of the orchestrator so late scores stay rejected
    cancelled: Mutex<HashSet<String>>,
    next_round: AtomicU64,
    collector: mpsc::UnboundedSender<Command>,
}

/// Concurrent consensus engine.
///
/// Cheap to clone; clones share the same state. Must be built inside a tokio
/// runtime.
#[derive(Clone)]
pub struct RuntimeOrchestrator {
    inner: Arc<Inner>,
}

impl RuntimeOrchestrator {
    pub fn builder(config: ConsensusConfig) -> RuntimeOrchestratorBuilder {
        RuntimeOrchestratorBuilder::new(config)
    }

    /// Submit one judge score.
    ///
    /// Returns once the score is queued for its round. Resolution happens in
    /// the background; results reach the configured sink.
    pub async fn submit(&self, score: JudgeScore) -> Result<(), RuntimeError> {
        if self.inner.config.criterion(&score.criterion_id).is_none() {
            return Err(ConsensusError::from(ResolutionError::UnknownCriterion(
                score.criterion_id,
            ))
            .into());
        }
        if self.is_cancelled(&score.item_id) {
            return Err(RuntimeError::Cancelled(score.item_id));
        }

        let key = score.round_key();
        loop {
            let (id, inbox) = match self.open_round(&key, &score) {
                Route::Live(id, inbox) => (id, inbox),
                Route::Opened => return Ok(()),
                Route::Stale => {
                    tracing::debug!(judge = %score.judge_id, round = %key, "Stale score dropped");
                    return Ok(());
                }
            };
            match inbox.send(score.clone()).await {
                Ok(()) => return Ok(()),
                Err(_) => {
                    // The round closed between lookup and send; retire it and retry
                    self.inner.retire(&key, id);
                }
            }
        }
    }

    /// Submit many scores concurrently. Results are in input order.
    pub async fn submit_batch(&self, scores: Vec<JudgeScore>) -> Vec<Result<(), RuntimeError>> {
        join_all(scores.into_iter().map(|score| self.submit(score))).await
    }

    /// Stop an item: open rounds are abandoned and no further results are
    /// emitted. Outcomes already recorded stay in the audit trail.
    pub async fn cancel(&self, item_id: &str) -> Result<(), RuntimeError> {
        self.inner.cancelled.lock().insert(item_id.to_string());
        if let Some(signal) = self.inner.cancels.lock().remove(item_id) {
            signal.send_replace(true);
        }
        self.query(|reply| Command::Cancel {
            item_id: item_id.to_string(),
            reply,
        })
        .await
    }

    pub fn is_cancelled(&self, item_id: &str) -> bool {
        self.inner.cancelled.lock().contains(item_id)
    }

    /// Record a reviewer's decision for an escalated round and re-resolve it.
    ///
    /// The decision is replayed for any later round with the identical score
    /// set. The new outcome produces a new result version once the item is
    /// complete.
    pub async fn decide(
        &self,
        item_id: &str,
        criterion_id: &str,
        decision: HumanDecision,
    ) -> Result<CriterionOutcome, RuntimeError> {
        let key = RoundKey::new(item_id, criterion_id);
        let (round, ticket) = self
            .query(|reply| Command::Ticket {
                key: key.clone(),
                reply,
            })
            .await?
            .ok_or_else(|| ConsensusError::NoEscalation(key.clone()))?;

        let inner = &self.inner;
        inner
            .resolver
            .check_decision(&key, &decision)
            .map_err(ConsensusError::from)?;
        if ticket.scores.len() < 2 {
            return Err(ConsensusError::from(ResolutionError::InsufficientJudges {
                key,
                count: ticket.scores.len(),
            })
            .into());
        }

        let record = {
            let mut overrides = inner.overrides.write();
            overrides.record(ticket.override_key.clone(), decision);
            inner
                .resolver
                .escalate_round(&key, &ticket.scores, ticket.reason.clone(), &overrides)
                .map_err(ConsensusError::from)?
        };
        inner.ledger.record_round(&record);

        // Carries the id of the round it decides, so a newer round wins
        let outcome = CriterionOutcome::Conflict { record };
        inner
            .collector
            .send(Command::Outcome {
                round,
                outcome: outcome.clone(),
            })
            .map_err(|_| RuntimeError::ShutDown)?;
        Ok(outcome)
    }

    pub async fn status(&self, item_id: &str) -> Result<Option<ItemStatus>, RuntimeError> {
        self.query(|reply| Command::Status {
            item_id: item_id.to_string(),
            reply,
        })
        .await
    }

    /// Every result version emitted for an item, oldest first.
    pub async fn results(&self, item_id: &str) -> Result<Vec<ConsensusResult>, RuntimeError> {
        self.query(|reply| Command::History {
            item_id: item_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn audit_trail(&self, item_id: &str) -> Result<Vec<CriterionOutcome>, RuntimeError> {
        self.query(|reply| Command::Trail {
            item_id: item_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn pending_escalations(&self) -> Result<Vec<EscalationTicket>, RuntimeError> {
        self.query(|reply| Command::Escalations { reply }).await
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.inner.ledger
    }

    /// Copy of every recorded human decision.
    pub fn overrides(&self) -> OverrideLedger {
        self.inner.overrides.read().clone()
    }

    pub fn open_rounds(&self) -> usize {
        self.inner.rounds.lock().len()
    }

    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.inner.runtime
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (reply, answer) = oneshot::channel();
        self.inner
            .collector
            .send(make(reply))
            .map_err(|_| RuntimeError::ShutDown)?;
        answer.await.map_err(|_| RuntimeError::ShutDown)
    }

    /// Inbox of the live round for `key`, otherwise open a new round seeded
    /// with the settled panel plus `score`.
    ///
    /// A score that does not supersede the settled panel opens nothing.
    fn open_round(&self, key: &RoundKey, score: &JudgeScore) -> Route {
        let inner = &self.inner;
        let mut rounds = inner.rounds.lock();
        if let Some(open) = rounds.get(key) {
            if !open.inbox.is_closed() {
                return Route::Live(open.id, open.inbox.clone());
            }
        }

        let seed = {
            let mut settled = inner.settled.lock();
            if !settled.submit(score.clone()).changed() {
                return Route::Stale;
            }
            settled.scores(key)
        };

        let id = inner.next_round.fetch_add(1, Ordering::Relaxed);
        let required = inner.config.required_judges(&key.criterion_id).unwrap_or(1);
        let timeout = inner.runtime.timeout_for(&key.criterion_id);
        let barrier = RoundBarrier::new(key.clone(), required, timeout).seeded(seed);

        let (tx, rx) = mpsc::channel(inner.runtime.channel_capacity);
        let cancel = inner
            .cancels
            .lock()
            .entry(key.item_id.clone())
            .or_insert_with(|| watch::channel(inner.cancelled.lock().contains(&key.item_id)).0)
            .subscribe();

        rounds.insert(key.clone(), OpenRound { id, inbox: tx });
        drop(rounds);

        tracing::debug!(round = %key, id = id, required = required, "Round opened");
        tokio::spawn(run_round(Arc::clone(inner), id, barrier, rx, cancel));
        Route::Opened
    }
}

impl Inner {
    /// Forget a round if it is still the one registered under `key`, and the
    /// item's cancel signal once none of its rounds are open.
    fn retire(&self, key: &RoundKey, id: u64) {
        let mut rounds = self.rounds.lock();
        if rounds.get(key).is_some_and(|open| open.id == id) {
            rounds.remove(key);
        }
        if !rounds.keys().any(|k| k.item_id == key.item_id) {
            self.cancels.lock().remove(&key.item_id);
        }
    }

    fn settle(&self, scores: impl IntoIterator<Item = JudgeScore>) {
        let mut settled = self.settled.lock();
        for score in scores {
            settled.submit(score);
        }
    }

    async fn assess_all(&self, scores: &[JudgeScore]) -> Vec<EvidenceQuality> {
        let assessor = self.resolver.assessor();
        join_all(
            scores
                .iter()
                .map(|s| self.cache.assess(assessor, &s.rationale)),
        )
        .await
    }

    async fn resolve(
        &self,
        barrier: &RoundBarrier,
        ended: BarrierOutcome,
    ) -> Result<CriterionOutcome, ResolutionError> {
        let key = barrier.key();
        let scores = barrier.scores();

        match ended {
            BarrierOutcome::TimedOut { waited } if !barrier.is_complete() => {
                let overrides = self.overrides.read();
                self.resolver
                    .timed_out(key, &scores, barrier.required(), waited, &overrides)
            }
            _ if scores.len() == 1 => self.resolver.single_judge(&scores[0]),
            _ => {
                let qualities = self.assess_all(&scores).await;
                let overrides = self.overrides.read();
                let record =
                    self.resolver
                        .resolve_assessed(&scores, &qualities, &self.ledger, &overrides)?;
                Ok(CriterionOutcome::Conflict { record })
            }
        }
    }
}

#[tracing::instrument(skip_all, fields(round = %barrier.key(), id = id))]
async fn run_round(
    inner: Arc<Inner>,
    id: u64,
    mut barrier: RoundBarrier,
    mut inbox: mpsc::Receiver<JudgeScore>,
    mut cancel: watch::Receiver<bool>,
) {
    let ended = barrier.wait(&mut inbox, &mut cancel).await;

    // Settle before retiring so a round reopened by a resubmission starts
    // from this panel, then take whatever was queued before the close
    let key = barrier.key().clone();
    inner.settle(barrier.scores());
    inner.retire(&key, id);
    inbox.close();
    while let Ok(score) = inbox.try_recv() {
        inner.settle([score.clone()]);
        barrier.offer(score);
    }

    if ended == BarrierOutcome::Cancelled {
        tracing::info!(reported = barrier.reported(), "Round abandoned; item cancelled");
        return;
    }

    let outcome = match inner.resolve(&barrier, ended).await {
        Ok(outcome) => {
            if let Some(record) = outcome.record() {
                inner.ledger.record_round(record);
            }
            outcome
        }
        Err(error) => {
            tracing::warn!(error = %error, "Round rejected");
            CriterionOutcome::Failed {
                item_id: key.item_id.clone(),
                criterion_id: key.criterion_id.clone(),
                error: error.to_string(),
                failed_at: Utc::now(),
            }
        }
    };

    if inner
        .collector
        .send(Command::Outcome { round: id, outcome })
        .is_err()
    {
        tracing::debug!("Collector gone; outcome dropped");
    }
}

/// Owns all per-item state. Applies outcomes in round order and emits a
/// result whenever a complete item changes.
///
/// An outcome from a round older than the one that produced the current
/// outcome is kept in the audit trail only.
async fn collect(
    mut orchestrator: ConsensusOrchestrator,
    mut commands: mpsc::UnboundedReceiver<Command>,
    sink: Arc<dyn ResultSink>,
) {
    let mut applied: HashMap<RoundKey, u64> = HashMap::new();
    while let Some(command) = commands.recv().await {
        match command {
            Command::Outcome { round, outcome } => {
                let key = outcome.round_key();
                if applied.get(&key).is_some_and(|latest| *latest > round) {
                    tracing::debug!(round = %key, id = round, "Outcome of a superseded round archived");
                    orchestrator.archive(outcome);
                    continue;
                }
                let item_id = outcome.item_id().to_string();
                let ticket = EscalationTicket::from_outcome(&outcome);
                if let Err(error) = orchestrator.record(outcome) {
                    tracing::warn!(item = %item_id, error = %error, "Outcome not recorded");
                    continue;
                }
                applied.insert(key, round);
                if orchestrator.is_cancelled(&item_id) {
                    continue;
                }
                if let Some(ticket) = ticket {
                    sink.escalation_raised(&ticket).await;
                }
                if orchestrator.is_complete(&item_id)
                    && orchestrator.has_unemitted_changes(&item_id)
                {
                    match orchestrator.finalize(&item_id) {
                        Ok(result) => sink.consensus_ready(&result).await,
                        Err(error) => {
                            tracing::warn!(item = %item_id, error = %error, "Finalize failed")
                        }
                    }
                }
            }
            Command::Cancel { item_id, reply } => {
                orchestrator.cancel(&item_id);
                let _ = reply.send(());
            }
            Command::Status { item_id, reply } => {
                let _ = reply.send(orchestrator.status(&item_id));
            }
            Command::History { item_id, reply } => {
                let _ = reply.send(orchestrator.history(&item_id).to_vec());
            }
            Command::Trail { item_id, reply } => {
                let _ = reply.send(orchestrator.audit_trail(&item_id).to_vec());
            }
            Command::Escalations { reply } => {
                let _ = reply.send(orchestrator.pending_escalations());
            }
            Command::Ticket { key, reply } => {
                let ticket = orchestrator
                    .outcome(&key.item_id, &key.criterion_id)
                    .and_then(EscalationTicket::from_outcome)
                    .map(|ticket| (applied.get(&key).copied().unwrap_or_default(), ticket));
                let _ = reply.send(ticket);
            }
        }
    }
    tracing::debug!(sink = sink.name(), "Collector stopped");
}

/// Builder for RuntimeOrchestrator.
pub struct RuntimeOrchestratorBuilder {
    config: ConsensusConfig,
    runtime: RuntimeConfig,
    sink: Option<Arc<dyn ResultSink>>,
    ledger: Option<SharedLedger>,
    overrides: OverrideLedger,
}

impl RuntimeOrchestratorBuilder {
    /// Create a new builder.
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            runtime: RuntimeConfig::default(),
            sink: None,
            ledger: None,
            overrides: OverrideLedger::new(),
        }
    }

    /// Set the runtime configuration.
    pub fn runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Set where results and escalations go. Defaults to [`TracingSink`].
    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Start from an existing reliability ledger.
    pub fn ledger(mut self, ledger: SharedLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Start from previously recorded human decisions.
    pub fn overrides(mut self, overrides: OverrideLedger) -> Self {
        self.overrides = overrides;
        self
    }

    /// Build the orchestrator and start its collector task.
    pub fn build(self) -> Result<RuntimeOrchestrator, RuntimeError> {
        self.runtime.validate()?;
        let resolver = Resolver::new(&self.config).map_err(ConsensusError::from)?;
        let ledger = self
            .ledger
            .unwrap_or_else(|| SharedLedger::new(self.config.reliability.clone()));
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));

        let (collector, commands) = mpsc::unbounded_channel();
        tokio::spawn(collect(
            ConsensusOrchestrator::new(&self.config),
            commands,
            sink,
        ));

        Ok(RuntimeOrchestrator {
            inner: Arc::new(Inner {
                cache: EvidenceCache::from_config(&self.runtime.evidence_cache),
                config: self.config,
                runtime: self.runtime,
                resolver,
                ledger,
                overrides: RwLock::new(self.overrides),
                rounds: Mutex::new(HashMap::new()),
                settled: Mutex::new(ScoreBook::new()),
                cancels: Mutex::new(HashMap::new()),
                cancelled: Mutex::new(HashSet::new()),
                next_round: AtomicU64::new(0),
                collector,
            }),
        })
    }
}
