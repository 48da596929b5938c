use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use concord_core::{
    ConsensusError, ConsensusResult, ConsensusSession, EscalationTicket, ReliabilityLedger,
};

use crate::args::{Format, ResolveArgs};
use crate::{exit_codes, input, output};

/// Everything a `resolve` run produced.
#[derive(Debug, Serialize)]
struct Report {
    results: Vec<ConsensusResult>,
    incomplete: Vec<Incomplete>,
    escalations: Vec<EscalationTicket>,
}

#[derive(Debug, Serialize)]
struct Incomplete {
    item_id: String,
    error: String,
}

impl Report {
    fn exit_code(&self) -> i32 {
        if self.incomplete.is_empty() && self.escalations.is_empty() {
            exit_codes::SUCCESS
        } else {
            exit_codes::UNRESOLVED
        }
    }
}

pub fn run(args: ResolveArgs) -> Result<i32> {
    let config = input::load_config(args.config.as_deref())?;
    let scores = input::load_scores(&args.scores)?;

    let mut session = ConsensusSession::new(config.clone())?;
    if let Some(path) = &args.ledger {
        let snapshot = input::load_ledger(path)?;
        tracing::info!(judges = snapshot.profiles.len(), "Restored reliability ledger");
        session = session.with_ledger(ReliabilityLedger::restore(
            config.reliability.clone(),
            snapshot,
        ));
    }
    if let Some(path) = &args.overrides {
        let overrides = input::load_overrides(path)?;
        tracing::info!(decisions = overrides.len(), "Loaded recorded decisions");
        session = session.with_overrides(overrides);
    }

    tracing::info!(scores = scores.len(), "Submitting scores");
    for score in scores {
        let key = score.round_key();
        session
            .submit(score)
            .with_context(|| format!("Rejected score for {}", key))?;
    }

    let mut outcomes: BTreeMap<String, Result<ConsensusResult, ConsensusError>> =
        session.resolve_all().into_iter().collect();

    if let Some(path) = &args.decisions {
        let mut decided = BTreeSet::new();
        for entry in input::load_decisions(path)? {
            session
                .submit_decision(&entry.item_id, &entry.criterion_id, entry.decision)
                .with_context(|| {
                    format!(
                        "Decision for {}/{} could not be applied",
                        entry.item_id, entry.criterion_id
                    )
                })?;
            decided.insert(entry.item_id);
        }
        for item_id in decided {
            let result = session.finalize(&item_id);
            outcomes.insert(item_id, result);
        }
    }

    let mut report = Report {
        results: Vec::new(),
        incomplete: Vec::new(),
        escalations: session.pending_escalations(),
    };
    for (item_id, outcome) in outcomes {
        match outcome {
            Ok(result) => report.results.push(result),
            Err(e) => report.incomplete.push(Incomplete {
                item_id,
                error: e.to_string(),
            }),
        }
    }

    if let Some(path) = &args.save_ledger {
        input::write(path, &session.ledger().snapshot().to_json()?)?;
    }
    if let Some(path) = &args.save_overrides {
        input::write(path, &session.overrides().to_json()?)?;
    }

    match args.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text(&report),
    }
    Ok(report.exit_code())
}

fn print_text(report: &Report) {
    for result in &report.results {
        print!("{}", output::result(result));
    }
    if !report.incomplete.is_empty() {
        println!();
        println!("Incomplete:");
        for item in &report.incomplete {
            println!("  {}: {}", item.item_id, item.error);
        }
    }
    if !report.escalations.is_empty() {
        println!();
        println!("Awaiting review ({}):", report.escalations.len());
        for ticket in &report.escalations {
            print!("{}", output::ticket(ticket));
        }
    }
}
