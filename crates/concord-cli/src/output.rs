//! Text rendering for terminal output.

use std::fmt::Write;

use concord_core::{
    ConsensusResult, CriterionState, EscalationTicket, EvidenceQuality, JudgeProfile,
};

pub fn result(result: &ConsensusResult) -> String {
    let mut out = String::new();
    let overall = match result.overall_score {
        Some(score) if result.escalated => format!("{:.2} (provisional)", score),
        Some(score) => format!("{:.2}", score),
        None => "-".to_string(),
    };
    let _ = writeln!(
        out,
        "{} v{}  overall {}  confidence {:.3}",
        result.item_id, result.version, overall, result.confidence
    );
    for report in &result.criteria {
        let _ = writeln!(
            out,
            "  {:<24} w={:.2}  {}",
            report.criterion_id,
            report.weight,
            state(&report.state)
        );
    }
    out
}

fn state(state: &CriterionState) -> String {
    match state {
        CriterionState::Pending => "pending".to_string(),
        CriterionState::Resolved {
            score,
            confidence,
            tier,
        } => match tier {
            Some(tier) => format!("{:.2} ({}, confidence {:.3})", score, tier, confidence),
            None => format!("{:.2} (single judge, confidence {:.3})", score, confidence),
        },
        CriterionState::Escalated { reason } => format!("ESCALATED: {}", reason),
        CriterionState::Failed { error } => format!("FAILED: {}", error),
    }
}

pub fn ticket(ticket: &EscalationTicket) -> String {
    let mut out = format!("{}  {}\n", ticket.round_key(), ticket.reason);
    for score in &ticket.scores {
        let _ = writeln!(out, "  {:<16} {:>5.2}  {}", score.judge_id, score.score, score.rationale);
    }
    out
}

pub fn evidence(quality: &EvidenceQuality) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "weight      {:.3}", quality.weight);
    let _ = writeln!(out, "length      {:.3}", quality.length_score);
    let _ = writeln!(
        out,
        "references  {:.3} ({} hits{})",
        quality.reference_score,
        quality.reference_count,
        if quality.references.is_empty() {
            String::new()
        } else {
            format!(": {}", quality.references.join(", "))
        }
    );
    let _ = writeln!(
        out,
        "quantified  {:.3} ({} hits)",
        quality.quantified_score, quality.quantified_count
    );
    out
}

pub fn profile(profile: &JudgeProfile) -> String {
    let bias = profile
        .bias()
        .map(|direction| format!("biased {}", direction))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<16} rounds {:>4}  mad {:.3}  signed {:+.3}  weight {:.3}  {}",
        profile.judge_id(),
        profile.rounds(),
        profile.mean_abs_deviation(),
        profile.signed_deviation(),
        profile.reliability_weight(),
        bias
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{evaluate_item, ConsensusConfig, JudgeScore};

    #[test]
    fn test_result_lists_every_criterion() {
        let config = ConsensusConfig::from_yaml(
            "criteria:\n  - id: clarity\n    weight: 0.5\n  - id: depth\n    weight: 0.5\n",
        )
        .unwrap();
        let scores = vec![
            JudgeScore::new("a", "plan-1", "clarity", 8.0, ""),
            JudgeScore::new("b", "plan-1", "clarity", 8.2, ""),
            JudgeScore::new("a", "plan-1", "depth", 2.0, ""),
            JudgeScore::new("b", "plan-1", "depth", 9.0, ""),
        ];
        let rendered = result(&evaluate_item(&config, &scores).unwrap());

        assert!(rendered.starts_with("plan-1 v1"));
        assert!(rendered.contains("clarity"));
        assert!(rendered.contains("ESCALATED"));
    }

    #[test]
    fn test_fresh_profile_has_no_bias() {
        let line = profile(&JudgeProfile::new("judge-a"));
        assert!(line.contains("weight 1.000"));
        assert!(line.ends_with('-'));
    }
}
