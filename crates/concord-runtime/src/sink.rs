//! Downstream collaborators for finished results and open escalations.

use async_trait::async_trait;
use tokio::sync::mpsc;

use concord_core::{ConsensusResult, EscalationTicket};

/// Receiver of everything the runtime emits.
///
/// Called from the single collector task, in emission order. Implementations
/// must not block; slow consumers should hand off to their own task.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// A new result version for an item.
    async fn consensus_ready(&self, result: &ConsensusResult);

    /// A round needs a human decision.
    async fn escalation_raised(&self, ticket: &EscalationTicket);

    fn name(&self) -> &str;
}

/// What a [`ChannelSink`] forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    ConsensusReady(ConsensusResult),
    EscalationRaised(EscalationTicket),
}

/// Forwards every event into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SinkEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Sink receiver dropped; event discarded");
        }
    }
}

#[async_trait]
impl ResultSink for ChannelSink {
    async fn consensus_ready(&self, result: &ConsensusResult) {
        self.forward(SinkEvent::ConsensusReady(result.clone()));
    }

    async fn escalation_raised(&self, ticket: &EscalationTicket) {
        self.forward(SinkEvent::EscalationRaised(ticket.clone()));
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Logs every event. The default sink.
pub struct TracingSink;

#[async_trait]
impl ResultSink for TracingSink {
    async fn consensus_ready(&self, result: &ConsensusResult) {
        tracing::info!(
            item = %result.item_id,
            version = result.version,
            overall = ?result.overall_score,
            confidence = result.confidence,
            escalated = result.escalated,
            "Consensus ready"
        );
    }

    async fn escalation_raised(&self, ticket: &EscalationTicket) {
        tracing::warn!(
            round = %ticket.round_key(),
            reason = %ticket.reason,
            judges = ticket.scores.len(),
            "Escalation raised"
        );
    }

    fn name(&self) -> &str {
        "tracing"
    }
}
