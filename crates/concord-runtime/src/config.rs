//! Runtime configuration: barrier timeouts, channel sizes and cache limits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::RuntimeError;

/// Configuration for the async runtime.
///
/// Durations are written the human way (`"30s"`, `"2m 30s"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long a round waits for its panel before escalating
    #[serde(with = "human_duration")]
    pub resolution_timeout: Duration,

    /// Per-criterion overrides of `resolution_timeout`
    #[serde(with = "human_duration_map")]
    pub criterion_timeouts: BTreeMap<String, Duration>,

    /// Buffered scores per open round
    pub channel_capacity: usize,

    pub evidence_cache: EvidenceCacheConfig,
}

/// Limits for the memoized evidence assessments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceCacheConfig {
    pub max_entries: u64,

    #[serde(with = "human_duration")]
    pub ttl: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            resolution_timeout: Duration::from_secs(300),
            criterion_timeouts: BTreeMap::new(),
            channel_capacity: 64,
            evidence_cache: EvidenceCacheConfig::default(),
        }
    }
}

impl Default for EvidenceCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, RuntimeError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| RuntimeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.channel_capacity == 0 {
            return Err(RuntimeError::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.resolution_timeout.is_zero()
            || self.criterion_timeouts.values().any(Duration::is_zero)
        {
            return Err(RuntimeError::Config(
                "resolution timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Barrier timeout for a criterion.
    pub fn timeout_for(&self, criterion_id: &str) -> Duration {
        self.criterion_timeouts
            .get(criterion_id)
            .copied()
            .unwrap_or(self.resolution_timeout)
    }
}

mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod human_duration_map {
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;
    use std::time::Duration;

    pub fn serialize<S>(map: &BTreeMap<String, Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (criterion, duration) in map {
            out.serialize_entry(criterion, &humantime::format_duration(*duration).to_string())?;
        }
        out.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        BTreeMap::<String, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(criterion, text)| {
                humantime::parse_duration(&text)
                    .map(|d| (criterion, d))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.resolution_timeout, Duration::from_secs(300));
        assert_eq!(config.channel_capacity, 64);
        assert_eq!(config.evidence_cache.max_entries, 10_000);
    }

    #[test]
    fn test_parse_human_durations() {
        let config = RuntimeConfig::from_yaml(
            r#"
resolution_timeout: 2m 30s
criterion_timeouts:
  clarity: 45s
evidence_cache:
  ttl: 10m
"#,
        )
        .unwrap();

        assert_eq!(config.resolution_timeout, Duration::from_secs(150));
        assert_eq!(config.timeout_for("clarity"), Duration::from_secs(45));
        assert_eq!(config.timeout_for("prioritization"), Duration::from_secs(150));
        assert_eq!(config.evidence_cache.ttl, Duration::from_secs(600));
        assert_eq!(config.evidence_cache.max_entries, 10_000);
    }

    #[test]
    fn test_serialized_form_round_trips() {
        let mut config = RuntimeConfig::default();
        config
            .criterion_timeouts
            .insert("clarity".into(), Duration::from_secs(90));
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("1m 30s"));
        assert_eq!(RuntimeConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            RuntimeConfig::from_yaml("resolution_timeout: soon"),
            Err(RuntimeError::Config(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml("channel_capacity: 0"),
            Err(RuntimeError::Config(_))
        ));
    }
}
