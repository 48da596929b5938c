//! Evidence quality assessment for judge rationales.
//!
//! A rationale that cites concrete standards, quantifies impact and names
//! affected elements is stronger evidence than a one-line opinion. The
//! assessor turns rationale text into a weight in `[min_weight, 1]` by
//! combining three saturating sub-scores:
//!
//! - **length**: characters of trimmed text, saturating at `length_saturation`
//! - **references**: matches against the configurable standards vocabulary
//! - **quantified**: numbers, comparatives and named affected elements
//!
//! The assessor is pure: the same text always yields the same weight. It
//! never fails, and an empty rationale still gets `min_weight` so weighted
//! means downstream never divide by zero.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Built-in standards vocabulary as (name, pattern).
const DEFAULT_TERMS: &[(&str, &str)] = &[
    ("wcag", r"(?i)\bWCAG(?:\s*\d(?:\.\d)?)?\b"),
    ("success_criterion", r"\b[1-4]\.\d{1,2}\.\d{1,2}\b"),
    ("aria", r"(?i)\baria-[a-z]+\b|\bWAI-ARIA\b"),
    ("iso", r"\bISO(?:/IEC)?\s*\d{3,5}(?:-\d+)?\b"),
    ("nist", r"\bNIST\s*(?:SP\s*)?\d{3}-\d+[A-Z]?\b"),
    ("owasp", r"(?i)\bOWASP\b"),
    ("cwe", r"\bCWE-\d+\b"),
    ("cve", r"\bCVE-\d{4}-\d{4,}\b"),
    ("rfc", r"\bRFC\s*\d{3,5}\b"),
    ("section", r"(?i)(?:\bsection\s*|§\s*)\d+(?:\.\d+)*"),
];

lazy_static! {
    static ref DEFAULT_VOCABULARY: Vec<(String, Regex)> = DEFAULT_TERMS
        .iter()
        .map(|(name, pattern)| (name.to_string(), Regex::new(pattern).unwrap()))
        .collect();

    // Numbers with optional units or ratios ("4.5:1", "300ms", "12%")
    static ref NUMBER_PATTERN: Regex = Regex::new(
        r"\b\d+(?:\.\d+)?(?:\s*(?:%|ms|px|pt|em|rem|s\b|:1\b))?"
    ).unwrap();

    static ref COMPARATIVE_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:more|less|fewer|higher|lower|better|worse|faster|slower|greater|smaller|larger)\b|\bcompared (?:to|with)\b|\bversus\b|\bat (?:least|most)\b"
    ).unwrap();

    // Named affected elements: UI parts, code units, or `backticked` identifiers
    static ref ELEMENT_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:buttons?|links?|forms?|fields?|inputs?|images?|headings?|tables?|menus?|modals?|dialogs?|pages?|screens?|endpoints?|components?|modules?|functions?)\b|`[^`\n]+`"
    ).unwrap();
}

/// A named standards reference pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VocabularyTerm {
    pub name: String,
    pub pattern: String,
}

/// Tuning for the evidence quality heuristic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Characters at which the length sub-score saturates
    pub length_saturation: usize,

    /// Vocabulary matches at which the reference sub-score saturates
    pub reference_saturation: usize,

    /// Quantified hits at which the quantified sub-score saturates
    pub quantified_saturation: usize,

    pub length_coefficient: f64,
    pub reference_coefficient: f64,
    pub quantified_coefficient: f64,

    /// Lowest weight any rationale can receive
    pub min_weight: f64,

    /// Qualities closer than this are treated as equal
    pub quality_tolerance: f64,

    pub vocabulary: Vec<VocabularyTerm>,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            length_saturation: 400,
            reference_saturation: 3,
            quantified_saturation: 4,
            length_coefficient: 0.3,
            reference_coefficient: 0.4,
            quantified_coefficient: 0.3,
            min_weight: 0.05,
            quality_tolerance: 1e-6,
            vocabulary: default_vocabulary(),
        }
    }
}

/// The built-in standards vocabulary.
pub fn default_vocabulary() -> Vec<VocabularyTerm> {
    DEFAULT_TERMS
        .iter()
        .map(|(name, pattern)| VocabularyTerm {
            name: name.to_string(),
            pattern: pattern.to_string(),
        })
        .collect()
}

impl EvidenceConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.length_saturation == 0
            || self.reference_saturation == 0
            || self.quantified_saturation == 0
        {
            return Err(ConfigError::ValidationError(
                "evidence saturation points must be at least 1".to_string(),
            ));
        }

        let coefficients = [
            self.length_coefficient,
            self.reference_coefficient,
            self.quantified_coefficient,
        ];
        if coefficients.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(ConfigError::ValidationError(
                "evidence coefficients must be non-negative".to_string(),
            ));
        }
        if coefficients.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::ValidationError(
                "evidence coefficients must not all be zero".to_string(),
            ));
        }

        if !(self.min_weight > 0.0 && self.min_weight <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "evidence.min_weight must be in (0, 1] (got {})",
                self.min_weight
            )));
        }

        compile_vocabulary(&self.vocabulary)?;
        Ok(())
    }
}

fn compile_vocabulary(terms: &[VocabularyTerm]) -> Result<Vec<(String, Regex)>, ConfigError> {
    terms
        .iter()
        .map(|term| {
            Regex::new(&term.pattern)
                .map(|re| (term.name.clone(), re))
                .map_err(|e| ConfigError::InvalidPattern {
                    name: term.name.clone(),
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Breakdown of one rationale's evidence quality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceQuality {
    /// Final weight in `[min_weight, 1]`
    pub weight: f64,

    pub length_score: f64,
    pub reference_score: f64,
    pub quantified_score: f64,

    /// Vocabulary terms that matched, in vocabulary order
    pub references: Vec<String>,

    pub reference_count: usize,
    pub quantified_count: usize,
}

/// Scores rationale text. Cheap to clone; compiled patterns are shared.
#[derive(Debug, Clone)]
pub struct EvidenceAssessor {
    config: EvidenceConfig,
    vocabulary: Vec<(String, Regex)>,
}

impl Default for EvidenceAssessor {
    fn default() -> Self {
        Self {
            config: EvidenceConfig::default(),
            vocabulary: DEFAULT_VOCABULARY.clone(),
        }
    }
}

impl EvidenceAssessor {
    /// Build an assessor, compiling the configured vocabulary.
    pub fn new(config: EvidenceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let vocabulary = compile_vocabulary(&config.vocabulary)?;
        Ok(Self { config, vocabulary })
    }

    pub fn config(&self) -> &EvidenceConfig {
        &self.config
    }

    /// Assess a rationale.
    pub fn assess(&self, rationale: &str) -> EvidenceQuality {
        let text = rationale.trim();
        let cfg = &self.config;

        let length = text.chars().count();
        let length_score = saturate(length, cfg.length_saturation);

        let mut references = Vec::new();
        let mut reference_count = 0;
        for (name, pattern) in &self.vocabulary {
            let hits = pattern.find_iter(text).count();
            if hits > 0 {
                references.push(name.clone());
                reference_count += hits;
            }
        }
        let reference_score = saturate(reference_count, cfg.reference_saturation);

        let quantified_count = NUMBER_PATTERN.find_iter(text).count()
            + COMPARATIVE_PATTERN.find_iter(text).count()
            + ELEMENT_PATTERN.find_iter(text).count();
        let quantified_score = saturate(quantified_count, cfg.quantified_saturation);

        let total = cfg.length_coefficient + cfg.reference_coefficient + cfg.quantified_coefficient;
        let combined = (cfg.length_coefficient * length_score
            + cfg.reference_coefficient * reference_score
            + cfg.quantified_coefficient * quantified_score)
            / total;

        let weight =
            (cfg.min_weight + (1.0 - cfg.min_weight) * combined).clamp(cfg.min_weight, 1.0);

        EvidenceQuality {
            weight,
            length_score,
            reference_score,
            quantified_score,
            references,
            reference_count,
            quantified_count,
        }
    }

    /// Just the weight.
    pub fn weight(&self, rationale: &str) -> f64 {
        self.assess(rationale).weight
    }

    /// Whether all weights lie within the configured tolerance of each other.
    pub fn all_equal(&self, weights: &[f64]) -> bool {
        let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = weights.iter().copied().fold(f64::INFINITY, f64::min);
        weights.is_empty() || max - min <= self.config.quality_tolerance
    }
}

fn saturate(count: usize, saturation: usize) -> f64 {
    (count as f64 / saturation as f64).min(1.0)
}
