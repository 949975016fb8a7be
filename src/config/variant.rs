//! Config variants and the rules file format

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tolerance for the weight-sum invariant.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Variant {name}: kw_weight + emb_weight = {sum} (must equal 1.0)")]
    WeightSum { name: String, sum: f64 },

    #[error("Variant {name}: {field} = {value} outside [0, 1]")]
    ThresholdRange {
        name: String,
        field: &'static str,
        value: f64,
    },

    #[error("Unknown variant: {0}")]
    UnknownVariant(String),

    #[error("Rules file has no variants")]
    Empty,

    #[error("Config file error: {0}")]
    FileError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// One named rule set. Requests snapshot exactly one variant at entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigVariant {
    pub name: String,
    /// Keyword component weight; must sum to 1 with `emb_weight`.
    pub kw_weight: f64,
    /// Embedding component weight.
    pub emb_weight: f64,
    /// Keyword score at which the embedding stage is skipped entirely.
    pub priority_threshold: f64,
    /// Absolute confidence floor for the gate.
    pub confidence_threshold: f64,
    /// Required top-1/top-2 gap for the gate.
    pub gap_threshold: f64,
    /// Whether the embedding matcher runs at all.
    pub use_embedding: bool,
    /// Whether ambiguous requests escalate to the LLM.
    pub use_llm: bool,
    /// Model id for escalations under this variant.
    pub llm_model: String,
}

impl ConfigVariant {
    /// The shipped default rule set.
    pub fn baseline() -> Self {
        Self {
            name: "baseline".to_string(),
            kw_weight: 0.6,
            emb_weight: 0.4,
            priority_threshold: 0.85,
            confidence_threshold: 0.6,
            gap_threshold: 0.15,
            use_embedding: true,
            use_llm: true,
            llm_model: "gpt-4o-mini".to_string(),
        }
    }

    /// Enforce the weight-sum and threshold-range invariants.
    pub fn validate(&self) -> ConfigResult<()> {
        let sum = self.kw_weight + self.emb_weight;
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(ConfigError::WeightSum {
                name: self.name.clone(),
                sum,
            });
        }
        for (field, value) in [
            ("kw_weight", self.kw_weight),
            ("emb_weight", self.emb_weight),
            ("priority_threshold", self.priority_threshold),
            ("confidence_threshold", self.confidence_threshold),
            ("gap_threshold", self.gap_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdRange {
                    name: self.name.clone(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// On-disk rules file: `{ "active_variant": ..., "rules": { "rule_sets": ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesFile {
    pub active_variant: String,
    pub rules: RulesSection,
}

/// Nested rule-set table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesSection {
    pub rule_sets: BTreeMap<String, ConfigVariant>,
}

impl RulesFile {
    /// Parse and validate a rules document. Every variant must pass
    /// validation and the active name must exist.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let file: RulesFile = serde_json::from_str(raw)?;
        if file.rules.rule_sets.is_empty() {
            return Err(ConfigError::Empty);
        }
        for (name, variant) in &file.rules.rule_sets {
            if &variant.name != name {
                return Err(ConfigError::UnknownVariant(format!(
                    "rule set key {name} names variant {}",
                    variant.name
                )));
            }
            variant.validate()?;
        }
        if !file.rules.rule_sets.contains_key(&file.active_variant) {
            return Err(ConfigError::UnknownVariant(file.active_variant.clone()));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_is_valid() {
        ConfigVariant::baseline().validate().unwrap();
    }

    #[test]
    fn test_weight_sum_rejected() {
        let mut variant = ConfigVariant::baseline();
        variant.kw_weight = 0.7;
        assert!(matches!(
            variant.validate(),
            Err(ConfigError::WeightSum { .. })
        ));
    }

    #[test]
    fn test_weight_sum_tolerates_epsilon() {
        let mut variant = ConfigVariant::baseline();
        variant.kw_weight = 0.6 + 5e-7;
        variant.emb_weight = 0.4 - 1e-7;
        assert!(variant.validate().is_ok());
    }

    #[test]
    fn test_threshold_range_rejected() {
        let mut variant = ConfigVariant::baseline();
        variant.gap_threshold = 1.5;
        assert!(matches!(
            variant.validate(),
            Err(ConfigError::ThresholdRange { .. })
        ));
    }

    #[test]
    fn test_rules_file_roundtrip() {
        let raw = r#"{
            "active_variant": "baseline",
            "rules": {"rule_sets": {"baseline": {
                "name": "baseline", "kw_weight": 0.6, "emb_weight": 0.4,
                "priority_threshold": 0.85, "confidence_threshold": 0.6,
                "gap_threshold": 0.15, "use_embedding": true, "use_llm": true,
                "llm_model": "gpt-4o-mini"
            }}}
        }"#;
        let file = RulesFile::parse(raw).unwrap();
        assert_eq!(file.active_variant, "baseline");
    }

    #[test]
    fn test_unknown_active_variant_rejected() {
        let raw = r#"{
            "active_variant": "missing",
            "rules": {"rule_sets": {"baseline": {
                "name": "baseline", "kw_weight": 0.6, "emb_weight": 0.4,
                "priority_threshold": 0.85, "confidence_threshold": 0.6,
                "gap_threshold": 0.15, "use_embedding": true, "use_llm": true,
                "llm_model": "gpt-4o-mini"
            }}}
        }"#;
        assert!(matches!(
            RulesFile::parse(raw),
            Err(ConfigError::UnknownVariant(_))
        ));
    }
}
