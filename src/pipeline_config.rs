//! Engine configuration: every hand-tuned heuristic the pipeline uses.
//!
//! The base confidences, boosts and penalties have no derivation beyond
//! field experience on bid sets, so they are exposed here instead of being
//! baked into the stages. Values load from an optional JSON file and are then
//! overridden by `SIGNAGE_*` environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ENV_PREFIX;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid environment override {key}={value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Source discovery scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryTuning {
    pub signage_schedule_base: f32,
    pub door_schedule_base: f32,
    pub finish_schedule_base: f32,
    pub floor_plan_base: f32,
    /// Added when a source has more than `match_boost_threshold` signature hits.
    pub match_boost: f32,
    pub match_boost_threshold: usize,
    /// Added when a source spans more than `span_boost_threshold` pages.
    pub span_boost: f32,
    pub span_boost_threshold: usize,
    /// Subtracted for single-page sources other than signage schedules.
    pub single_page_penalty: f32,
    /// Top confidence below this produces a discovery warning.
    pub low_confidence_warning: f32,
    /// Minimum room tags for a page to count as a floor plan without a sheet prefix.
    pub floor_plan_min_room_tags: usize,
}

impl Default for DiscoveryTuning {
    fn default() -> Self {
        Self {
            signage_schedule_base: 0.95,
            door_schedule_base: 0.85,
            finish_schedule_base: 0.70,
            floor_plan_base: 0.50,
            match_boost: 0.05,
            match_boost_threshold: 3,
            span_boost: 0.03,
            span_boost_threshold: 2,
            single_page_penalty: 0.05,
            low_confidence_warning: 0.6,
            floor_plan_min_room_tags: 8,
        }
    }
}

/// Parsing, verification and resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileTuning {
    /// Largest grouped range ("BAY 1-20") accepted as one sign.
    pub max_group_span: u32,
    /// Resolution passes before the loop gives up.
    pub max_resolution_passes: u32,
    /// Verification confidence needed before secondary additions are folded in.
    pub secondary_merge_threshold: f32,
    /// Secondary parse confidence needed for a superset addition to resolve automatically.
    pub min_addition_confidence: f32,
    /// Confidence gap that lets the primary source win a conflict automatically.
    pub auto_resolve_margin: f32,
    /// Relative total difference that flags an aggregate count mismatch.
    pub aggregate_mismatch_ratio: f32,
    /// Confidence gap needed to keep the primary total over an incompatible source.
    pub aggregate_keep_margin: f32,
    pub final_confidence_floor: f32,
    pub fallback_confidence_floor: f32,
    /// Deterministic results at or above this skip the fast-path and agent.
    pub adequate_confidence: f32,
}

impl Default for ReconcileTuning {
    fn default() -> Self {
        Self {
            max_group_span: 20,
            max_resolution_passes: 3,
            secondary_merge_threshold: 0.6,
            min_addition_confidence: 0.6,
            auto_resolve_margin: 0.15,
            aggregate_mismatch_ratio: 0.25,
            aggregate_keep_margin: 0.2,
            final_confidence_floor: 0.3,
            fallback_confidence_floor: 0.2,
            adequate_confidence: 0.6,
        }
    }
}

/// Fast-path pattern extractor gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastPathTuning {
    pub min_content_confidence: f32,
    pub min_entries: usize,
    pub min_confidence: f32,
    pub max_confidence: f32,
}

impl Default for FastPathTuning {
    fn default() -> Self {
        Self {
            min_content_confidence: 0.7,
            min_entries: 3,
            min_confidence: 0.5,
            max_confidence: 0.90,
        }
    }
}

/// Bounded agentic loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTuning {
    pub model: String,
    pub max_iterations: u32,
    pub budget_usd: f64,
    /// Consecutive equal non-zero submission counts that end the loop.
    pub stability_window: usize,
    /// Submissions at or above this confidence complete the loop immediately.
    pub accept_confidence: f32,
    pub max_tokens: u32,
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".into(),
            max_iterations: 15,
            budget_usd: 1.50,
            stability_window: 3,
            accept_confidence: 0.85,
            max_tokens: 4096,
            api_base: "https://api.anthropic.com".into(),
            api_key: None,
            timeout_secs: 300,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub discovery: DiscoveryTuning,
    pub reconcile: ReconcileTuning,
    pub fast_path: FastPathTuning,
    pub agent: AgentTuning,
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl EngineConfig {
    /// Parse a JSON config. Missing sections and fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Apply `SIGNAGE_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (testable without touching the env).
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let key = |name: &str| format!("{ENV_PREFIX}{name}");

        if let Some(model) = lookup(&key("AGENT_MODEL")) {
            self.agent.model = model;
        }
        if let Some(raw) = lookup(&key("AGENT_BUDGET_USD")) {
            self.agent.budget_usd = parse_env(&key("AGENT_BUDGET_USD"), &raw)?;
        }
        if let Some(raw) = lookup(&key("AGENT_MAX_ITERATIONS")) {
            self.agent.max_iterations = parse_env(&key("AGENT_MAX_ITERATIONS"), &raw)?;
        }
        if let Some(base) = lookup(&key("API_BASE")) {
            self.agent.api_base = base;
        }
        if let Some(api_key) = lookup(&key("API_KEY")) {
            self.agent.api_key = Some(api_key);
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {v}")))
            }
        };

        let d = &self.discovery;
        unit("discovery.signage_schedule_base", d.signage_schedule_base)?;
        unit("discovery.door_schedule_base", d.door_schedule_base)?;
        unit("discovery.finish_schedule_base", d.finish_schedule_base)?;
        unit("discovery.floor_plan_base", d.floor_plan_base)?;

        let r = &self.reconcile;
        unit("reconcile.secondary_merge_threshold", r.secondary_merge_threshold)?;
        unit("reconcile.min_addition_confidence", r.min_addition_confidence)?;
        unit("reconcile.final_confidence_floor", r.final_confidence_floor)?;
        unit("reconcile.fallback_confidence_floor", r.fallback_confidence_floor)?;
        if r.max_resolution_passes == 0 {
            return Err(ConfigError::Invalid("reconcile.max_resolution_passes must be > 0".into()));
        }

        let f = &self.fast_path;
        if f.min_confidence > f.max_confidence || f.max_confidence > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "fast_path confidence bounds [{}, {}] are inverted or exceed 1.0",
                f.min_confidence, f.max_confidence
            )));
        }

        let a = &self.agent;
        if a.max_iterations == 0 {
            return Err(ConfigError::Invalid("agent.max_iterations must be > 0".into()));
        }
        if !(a.budget_usd > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "agent.budget_usd must be positive, got {}",
                a.budget_usd
            )));
        }
        if a.stability_window < 2 {
            return Err(ConfigError::Invalid("agent.stability_window must be >= 2".into()));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn discovery_bases_are_ordered() {
        let d = DiscoveryTuning::default();
        assert!(d.signage_schedule_base > d.door_schedule_base);
        assert!(d.door_schedule_base > d.finish_schedule_base);
        assert!(d.finish_schedule_base > d.floor_plan_base);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"agent": {"budget_usd": 0.5}}"#).unwrap();
        assert_eq!(config.agent.budget_usd, 0.5);
        assert_eq!(config.agent.max_iterations, 15);
        assert_eq!(config.reconcile.max_resolution_passes, 3);
    }

    #[test]
    fn invalid_json_is_error() {
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn out_of_range_base_rejected() {
        let result = EngineConfig::from_json_str(r#"{"discovery": {"floor_plan_base": 1.5}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn env_overrides_applied() {
        let config = EngineConfig::default()
            .apply_overrides(|key| match key {
                "SIGNAGE_AGENT_BUDGET_USD" => Some("2.25".into()),
                "SIGNAGE_AGENT_MODEL" => Some("test-model".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.agent.budget_usd, 2.25);
        assert_eq!(config.agent.model, "test-model");
    }

    #[test]
    fn bad_env_value_rejected() {
        let result = EngineConfig::default().apply_overrides(|key| {
            (key == "SIGNAGE_AGENT_MAX_ITERATIONS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn api_key_never_serialized() {
        let mut config = EngineConfig::default();
        config.agent.api_key = Some("secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
