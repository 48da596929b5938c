//! Consensus configuration parsing and validation.
//!
//! Configurations are structured data validated against JSON Schema and then
//! checked semantically (weights sum to 1, thresholds ordered, patterns
//! compile). Every section is optional and has documented defaults.

mod parser;
mod schema;

pub use parser::{
    ConfidencePolicy, ConfigError, ConsensusConfig, CriterionConfig, ScoreScale,
    SeverityThresholds,
};
pub use schema::{schema_source, validate_config_schema, SchemaError};
