//! # concord-runtime
//!
//! Concurrent score intake for Concord.
//!
//! `concord-core` resolves a round once its scores are known. This crate
//! deals with scores that arrive over time, from many judges at once:
//!
//! - every (item, criterion) round waits behind a barrier until its panel has
//!   reported or its timeout elapses
//! - rounds resolve independently; the reliability ledger is the only shared
//!   write, locked per judge
//! - results and escalations are pushed to a [`ResultSink`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use concord_runtime::{ChannelSink, RuntimeOrchestrator, SinkEvent};
//!
//! let (sink, mut events) = ChannelSink::new();
//! let runtime = RuntimeOrchestrator::builder(config)
//!     .sink(Arc::new(sink))
//!     .build()?;
//!
//! runtime.submit(JudgeScore::new("judge-a", "plan-7", "clarity", 8.0, "")).await?;
//! runtime.submit(JudgeScore::new("judge-b", "plan-7", "clarity", 8.4, "")).await?;
//!
//! while let Some(SinkEvent::ConsensusReady(result)) = events.recv().await {
//!     println!("{} v{}: {:?}", result.item_id, result.version, result.overall_score);
//! }
//! ```

pub mod barrier;
pub mod cache;
pub mod config;
pub mod ledger;
pub mod orchestrator;
pub mod sink;

pub use barrier::{BarrierOutcome, RoundBarrier};
pub use cache::EvidenceCache;
pub use config::{EvidenceCacheConfig, RuntimeConfig};
pub use ledger::SharedLedger;
pub use orchestrator::{RuntimeOrchestrator, RuntimeOrchestratorBuilder};
pub use sink::{ChannelSink, ResultSink, SinkEvent, TracingSink};

use concord_core::ConsensusError;
use thiserror::Error;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error("Runtime configuration error: {0}")]
    Config(String),

    #[error("Item '{0}' was cancelled")]
    Cancelled(String),

    #[error("Runtime has shut down")]
    ShutDown,
}

impl RuntimeError {
    /// Whether more input could still turn this into a result.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Consensus(e) => e.is_recoverable(),
            _ => false,
        }
    }
}
