//! JSON Schema validation for consensus configuration.
//!
//! Configurations are validated against schema/consensus.schema.json before
//! they are deserialized, so typos in section or field names are reported
//! instead of silently falling back to defaults.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded configuration schema (loaded at compile time).
const CONSENSUS_SCHEMA_JSON: &str = include_str!("../../../../schema/consensus.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(CONSENSUS_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a configuration JSON value against the schema.
///
/// Returns every violation, each suffixed with its instance path.
pub fn validate_config_schema(config_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(config_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// The raw schema text, for tooling that wants to publish it.
pub fn schema_source() -> &'static str {
    CONSENSUS_SCHEMA_JSON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_valid() {
        assert!(validate_config_schema(&serde_json::json!({})).is_ok());
    }

    #[test]
    fn test_full_config_passes_schema() {
        let value = serde_json::json!({
            "scale": { "min": 0, "max": 10 },
            "criteria": [
                { "id": "clarity", "weight": 0.6, "required_judges": 3 },
                { "id": "prioritization", "weight": 0.4 }
            ],
            "thresholds": { "moderate_at": 2.0, "major_at": 3.0 },
            "confidence": { "minor": 0.95, "critical": 0.4 },
            "evidence": {
                "min_weight": 0.05,
                "vocabulary": [{ "name": "wcag", "pattern": "WCAG" }]
            },
            "reliability": { "smoothing": 0.18, "bias_run_length": 3 }
        });
        assert!(validate_config_schema(&value).is_ok());
    }

    #[test]
    fn test_unknown_section_fails() {
        let value = serde_json::json!({ "thresholdz": {} });
        assert!(validate_config_schema(&value).is_err());
    }

    #[test]
    fn test_criterion_without_weight_fails() {
        let value = serde_json::json!({ "criteria": [{ "id": "clarity" }] });
        let errors = validate_config_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_zero_weight_fails() {
        let value = serde_json::json!({ "criteria": [{ "id": "clarity", "weight": 0 }] });
        assert!(validate_config_schema(&value).is_err());
    }

    #[test]
    fn test_confidence_out_of_unit_range_fails() {
        let value = serde_json::json!({ "confidence": { "minor": 1.5 } });
        let errors = validate_config_schema(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("/confidence/minor")));
    }

    #[test]
    fn test_non_object_fails() {
        assert!(validate_config_schema(&serde_json::json!([1, 2])).is_err());
    }
}
