//! Loading score files, decisions and persisted state.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use concord_core::{ConsensusConfig, HumanDecision, JudgeScore, LedgerSnapshot, OverrideLedger};

/// A reviewer decision for one escalated round.
#[derive(Debug, Deserialize)]
pub struct DecisionEntry {
    pub item_id: String,
    pub criterion_id: String,

    #[serde(flatten)]
    pub decision: HumanDecision,
}

/// Configuration from a file, or the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<ConsensusConfig> {
    match path {
        Some(path) => ConsensusConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(ConsensusConfig::default()),
    }
}

pub fn load_scores(path: &Path) -> Result<Vec<JudgeScore>> {
    let scores: Vec<JudgeScore> = read_document(path)?;
    if scores.is_empty() {
        bail!("{} contains no scores", path.display());
    }
    Ok(scores)
}

pub fn load_decisions(path: &Path) -> Result<Vec<DecisionEntry>> {
    read_document(path)
}

pub fn load_ledger(path: &Path) -> Result<LedgerSnapshot> {
    let text = read(path)?;
    LedgerSnapshot::from_json(&text)
        .with_context(|| format!("Invalid ledger snapshot {}", path.display()))
}

pub fn load_overrides(path: &Path) -> Result<OverrideLedger> {
    let text = read(path)?;
    OverrideLedger::from_json(&text)
        .with_context(|| format!("Invalid override file {}", path.display()))
}

pub fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// JSON or YAML by extension. Unknown extensions are tried as JSON, then YAML.
fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read(path)?;
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text).map_err(anyhow::Error::from),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&text).map_err(anyhow::Error::from),
        _ => serde_json::from_str(&text)
            .or_else(|_| serde_yaml::from_str(&text))
            .map_err(anyhow::Error::from),
    };
    parsed.with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_scores_from_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "- judge_id: a\n  item_id: plan-1\n  criterion_id: clarity\n  score: 7.5\n"
        )
        .unwrap();

        let scores = load_scores(file.path()).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].rationale, "");
        assert_eq!(scores[0].score, 7.5);
    }

    #[test]
    fn test_empty_score_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "[]").unwrap();
        assert!(load_scores(file.path()).is_err());
    }

    #[test]
    fn test_decision_entry_flattens_decision() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"[{{"item_id": "plan-1", "criterion_id": "clarity", "score": 6.0, "reviewer": "lead"}}]"#
        )
        .unwrap();

        let decisions = load_decisions(file.path()).unwrap();
        assert_eq!(decisions[0].criterion_id, "clarity");
        assert_eq!(decisions[0].decision.reviewer, "lead");
        assert!(decisions[0].decision.notes.is_empty());
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config, ConsensusConfig::default());
    }
}
