//! Consensus configuration parsing from YAML/JSON.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::schema::validate_config_schema;
use crate::evidence::EvidenceConfig;
use crate::reliability::ReliabilityConfig;

/// Tolerance when checking that criterion weights sum to 1.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Errors that can occur when loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Config validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid evidence pattern '{name}': {message}")]
    InvalidPattern { name: String, message: String },

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// Inclusive numeric range scores must fall in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreScale {
    pub min: f64,
    pub max: f64,
}

impl Default for ScoreScale {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 10.0,
        }
    }
}

impl ScoreScale {
    /// Whether a score is finite and inside the scale.
    pub fn contains(&self, score: f64) -> bool {
        score.is_finite() && score >= self.min && score <= self.max
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

fn default_required_judges() -> usize {
    2
}

/// One evaluation criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionConfig {
    /// Unique identifier (e.g. "clarity")
    pub id: String,

    /// Share of the overall score; all weights sum to 1
    pub weight: f64,

    /// Distinct judges the round barrier waits for
    #[serde(default = "default_required_judges")]
    pub required_judges: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CriterionConfig {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
            required_judges: default_required_judges(),
            description: None,
        }
    }

    pub fn with_required_judges(mut self, required: usize) -> Self {
        self.required_judges = required;
        self
    }
}

/// Score-difference boundaries between severity tiers.
///
/// `difference < moderate_at` is minor, `moderate_at <= difference < major_at`
/// is moderate, anything above is major.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeverityThresholds {
    pub moderate_at: f64,
    pub major_at: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            moderate_at: 2.0,
            major_at: 3.0,
        }
    }
}

/// Confidence constants attached to each resolution path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfidencePolicy {
    /// Base confidence of a minor-tier mean
    pub minor: f64,
    /// Subtracted per point of score difference (minor tier)
    pub minor_penalty: f64,
    /// Base confidence of a moderate-tier weighted mean
    pub moderate: f64,
    /// Subtracted per point of score difference (moderate tier)
    pub moderate_penalty: f64,
    /// Fixed confidence of a bias-adjusted resolution
    pub critical: f64,
    /// Confidence of a replayed human decision
    pub human_override: f64,
    /// Fraction removed from `minor` when only one judge reported
    pub single_judge_penalty: f64,
    /// Subtracted from aggregate confidence per escalated criterion
    pub escalation_penalty: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            minor: 0.95,
            minor_penalty: 0.025,
            moderate: 0.80,
            moderate_penalty: 0.05,
            critical: 0.40,
            human_override: 0.90,
            single_judge_penalty: 0.5,
            escalation_penalty: 0.10,
        }
    }
}

impl ConfidencePolicy {
    /// Confidence of a score that passed through without a second opinion.
    pub fn single_judge(&self) -> f64 {
        (self.minor * (1.0 - self.single_judge_penalty)).clamp(0.0, 1.0)
    }
}

fn default_criteria() -> Vec<CriterionConfig> {
    vec![
        CriterionConfig::new("comprehensiveness", 0.4),
        CriterionConfig::new("technical_specificity", 0.3),
        CriterionConfig::new("prioritization", 0.2),
        CriterionConfig::new("clarity", 0.1),
    ]
}

/// Complete configuration for one consensus engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusConfig {
    #[serde(default)]
    pub scale: ScoreScale,

    /// Criteria in report order
    #[serde(default = "default_criteria")]
    pub criteria: Vec<CriterionConfig>,

    #[serde(default)]
    pub thresholds: SeverityThresholds,

    #[serde(default)]
    pub confidence: ConfidencePolicy,

    #[serde(default)]
    pub evidence: EvidenceConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            scale: ScoreScale::default(),
            criteria: default_criteria(),
            thresholds: SeverityThresholds::default(),
            confidence: ConfidencePolicy::default(),
            evidence: EvidenceConfig::default(),
            reliability: ReliabilityConfig::default(),
        }
    }
}

impl ConsensusConfig {
    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse a configuration file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            Some("json") => Self::from_json_file(path),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        validate_config_schema(&value).map_err(ConfigError::SchemaError)?;
        let config: ConsensusConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.scale.min.is_finite() && self.scale.max.is_finite())
            || self.scale.min >= self.scale.max
        {
            return Err(ConfigError::ValidationError(format!(
                "scale.min ({}) must be below scale.max ({})",
                self.scale.min, self.scale.max
            )));
        }

        self.validate_criteria()?;

        let t = &self.thresholds;
        if !(t.moderate_at > 0.0 && t.moderate_at < t.major_at) {
            return Err(ConfigError::ValidationError(format!(
                "thresholds must satisfy 0 < moderate_at ({}) < major_at ({})",
                t.moderate_at, t.major_at
            )));
        }

        self.validate_confidence()?;
        self.evidence.validate()?;
        self.reliability.validate()?;

        Ok(())
    }

    fn validate_criteria(&self) -> Result<(), ConfigError> {
        if self.criteria.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one criterion is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for criterion in &self.criteria {
            if criterion.id.is_empty() {
                return Err(ConfigError::ValidationError(
                    "criterion id must not be empty".to_string(),
                ));
            }
            if !seen.insert(criterion.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate criterion ID: {}",
                    criterion.id
                )));
            }
            if !(criterion.weight.is_finite() && criterion.weight > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "criterion '{}' weight must be positive",
                    criterion.id
                )));
            }
            if criterion.required_judges == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "criterion '{}' must require at least one judge",
                    criterion.id
                )));
            }
        }

        let total: f64 = self.criteria.iter().map(|c| c.weight).sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::ValidationError(format!(
                "criterion weights must sum to 1 (got {})",
                total
            )));
        }

        Ok(())
    }

    fn validate_confidence(&self) -> Result<(), ConfigError> {
        let c = &self.confidence;
        let unit = [
            ("minor", c.minor),
            ("moderate", c.moderate),
            ("critical", c.critical),
            ("human_override", c.human_override),
            ("single_judge_penalty", c.single_judge_penalty),
            ("escalation_penalty", c.escalation_penalty),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "confidence.{} must be in [0, 1] (got {})",
                    name, value
                )));
            }
        }
        if c.minor_penalty < 0.0 || c.moderate_penalty < 0.0 {
            return Err(ConfigError::ValidationError(
                "confidence penalties must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up a criterion by id.
    pub fn criterion(&self, id: &str) -> Option<&CriterionConfig> {
        self.criteria.iter().find(|c| c.id == id)
    }

    pub fn criterion_ids(&self) -> impl Iterator<Item = &str> {
        self.criteria.iter().map(|c| c.id.as_str())
    }

    /// Number of judges the barrier waits for on a criterion.
    pub fn required_judges(&self, criterion_id: &str) -> Option<usize> {
        self.criterion(criterion_id).map(|c| c.required_judges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
scale:
  min: 1
  max: 5
criteria:
  - id: accuracy
    weight: 0.7
    required_judges: 3
  - id: tone
    weight: 0.3
thresholds:
  moderate_at: 1.0
  major_at: 2.0
reliability:
  smoothing: 0.25
"#;

    #[test]
    fn test_parse_valid_config() {
        let config = ConsensusConfig::from_yaml(VALID_CONFIG).unwrap();
        assert_eq!(config.scale, ScoreScale { min: 1.0, max: 5.0 });
        assert_eq!(config.criteria.len(), 2);
        assert_eq!(config.required_judges("accuracy"), Some(3));
        assert_eq!(config.required_judges("tone"), Some(2));
        assert_eq!(config.thresholds.major_at, 2.0);
        assert_eq!(config.reliability.smoothing, 0.25);
        // Untouched sections keep their defaults
        assert_eq!(config.confidence, ConfidencePolicy::default());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ConsensusConfig::default();
        config.validate().unwrap();
        let ids: Vec<&str> = config.criterion_ids().collect();
        assert_eq!(
            ids,
            vec![
                "comprehensiveness",
                "technical_specificity",
                "prioritization",
                "clarity"
            ]
        );
    }

    #[test]
    fn test_empty_json_object_uses_defaults() {
        let config = ConsensusConfig::from_json("{}").unwrap();
        assert_eq!(config, ConsensusConfig::default());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let yaml = r#"
criteria:
  - id: a
    weight: 0.5
  - id: b
    weight: 0.3
"#;
        let result = ConsensusConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_duplicate_criterion_ids() {
        let yaml = r#"
criteria:
  - id: a
    weight: 0.5
  - id: a
    weight: 0.5
"#;
        let result = ConsensusConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let yaml = "thresholds:\n  moderate_at: 3.0\n  major_at: 2.0\n";
        let result = ConsensusConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_schema_violation_reported() {
        let yaml = "criteria:\n  - id: a\n    weight: 1.0\n    weigth: 1.0\n";
        let result = ConsensusConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::SchemaError(_))));
    }

    #[test]
    fn test_inverted_scale_rejected() {
        let mut config = ConsensusConfig::default();
        config.scale = ScoreScale { min: 10.0, max: 0.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_vocabulary_pattern_rejected() {
        let yaml = r#"
evidence:
  vocabulary:
    - name: broken
      pattern: "WCAG("
"#;
        let result = ConsensusConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_unsupported_extension() {
        let result = ConsensusConfig::from_file("consensus.toml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_single_judge_confidence() {
        let policy = ConfidencePolicy::default();
        assert!((policy.single_judge() - 0.475).abs() < 1e-12);
    }

    #[test]
    fn test_scale_contains() {
        let scale = ScoreScale::default();
        assert!(scale.contains(0.0));
        assert!(scale.contains(10.0));
        assert!(!scale.contains(10.5));
        assert!(!scale.contains(f64::NAN));
    }
}
