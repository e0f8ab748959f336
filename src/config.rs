use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::clients::ProviderKind;
use crate::conditions::PromptModifier;

/// Main configuration structure loaded from dual_ai.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub generator: GeneratorConfig,
    pub validator: ValidatorConfig,
    pub workflow: WorkflowConfig,
    pub learning: LearningConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// A1 generation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub primary_provider: ProviderKind,
    pub primary_model: String,
    /// Single fallback attempted when the primary call fails; `None` disables it
    pub fallback_provider: Option<ProviderKind>,
    pub fallback_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Context-conditional instructions appended to generation prompts
    pub modifiers: Vec<PromptModifier>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            primary_provider: ProviderKind::Anthropic,
            primary_model: "claude-sonnet-4-5".to_string(),
            fallback_provider: Some(ProviderKind::OpenAi),
            fallback_model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            modifiers: Vec::new(),
        }
    }
}

/// B1 validation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o".to_string(),
            temperature: 0.1,
            max_tokens: 2000,
        }
    }
}

/// Orchestration thresholds and loop bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Percentage (0-100) below which content requires revision
    pub confidence_threshold: f64,
    pub max_iterations: u32,
    pub batch_size: usize,
    /// Node type → weight for overall confidence; unlisted types weigh 1.0
    pub node_weights: HashMap<String, f64>,
    pub improvement_enabled: bool,
    /// Divergence (0-1) above which a disagreement is escalated instead of revised
    pub escalation_divergence: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 85.0,
            max_iterations: 3,
            batch_size: 5,
            node_weights: HashMap::new(),
            improvement_enabled: true,
            escalation_divergence: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Occurrences before a recurring issue pattern is considered actionable
    pub pattern_threshold: u32,
    pub max_events: usize,
    pub max_patterns: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            pattern_threshold: 3,
            max_events: 1000,
            max_patterns: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 500,
            ttl_secs: 3600,
        }
    }
}

/// Workflow bookkeeping; no path disables persistence
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub sqlite_path: Option<String>,
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    pub http_timeout_ms: u64,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            openai_api_key: None,
            anthropic_base_url: crate::clients::anthropic::DEFAULT_BASE_URL.to_string(),
            openai_base_url: crate::clients::openai::DEFAULT_BASE_URL.to_string(),
            http_timeout_ms: 60_000,
            log_level: "dual_ai=info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let defaults = Self::default();
        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            anthropic_base_url: std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or(defaults.anthropic_base_url),
            openai_base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            http_timeout_ms: env_parse("DUAL_HTTP_TIMEOUT_MS").unwrap_or(defaults.http_timeout_ms),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses DUAL_AI_CONFIG environment variable or defaults to "dual_ai.toml"
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(env_path) = std::env::var("DUAL_ENV_FILE") {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::from_path(".env");
        }

        let config_path =
            std::env::var("DUAL_AI_CONFIG").unwrap_or_else(|_| "dual_ai.toml".to_string());

        let mut config: Config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            Self::from_toml_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("ANTHROPIC_MODEL") {
            if self.generator.primary_provider == ProviderKind::Anthropic {
                self.generator.primary_model = model;
            }
            tracing::debug!("ANTHROPIC_MODEL env override applied");
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            if self.validator.provider == ProviderKind::OpenAi {
                self.validator.model = model.clone();
            }
            if self.generator.fallback_provider == Some(ProviderKind::OpenAi) {
                self.generator.fallback_model = model;
            }
            tracing::debug!("OPENAI_MODEL env override applied");
        }
        if let Some(threshold) = env_parse("DUAL_CONFIDENCE_THRESHOLD") {
            self.workflow.confidence_threshold = threshold;
        }
        if let Some(max) = env_parse("DUAL_MAX_ITERATIONS") {
            self.workflow.max_iterations = max;
        }
        if let Some(batch) = env_parse("DUAL_BATCH_SIZE") {
            self.workflow.batch_size = batch;
        }
        if let Some(enabled) = env_flag("DUAL_IMPROVEMENT_ENABLED") {
            self.workflow.improvement_enabled = enabled;
        }
        if let Some(threshold) = env_parse("DUAL_PATTERN_THRESHOLD") {
            self.learning.pattern_threshold = threshold;
        }
        if let Some(enabled) = env_flag("DUAL_CACHE_ENABLED") {
            self.cache.enabled = enabled;
        }
        if let Some(ttl) = env_parse("DUAL_CACHE_TTL_SECS") {
            self.cache.ttl_secs = ttl;
        }
        if let Ok(path) = std::env::var("DUAL_STORE_PATH") {
            self.store.sqlite_path = Some(path).filter(|p| !p.trim().is_empty());
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let threshold = self.workflow.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 100.0) {
            anyhow::bail!("workflow.confidence_threshold must be in (0, 100], got {threshold}");
        }
        if !(1..=10).contains(&self.workflow.max_iterations) {
            anyhow::bail!("workflow.max_iterations must be between 1 and 10");
        }
        if self.workflow.batch_size == 0 {
            anyhow::bail!("workflow.batch_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.workflow.escalation_divergence) {
            anyhow::bail!("workflow.escalation_divergence must be between 0.0 and 1.0");
        }
        if let Some((node, weight)) = self.workflow.node_weights.iter().find(|(_, w)| **w < 0.0) {
            anyhow::bail!("workflow.node_weights.{node} must be non-negative, got {weight}");
        }
        for (label, t) in [
            ("generator.temperature", self.generator.temperature),
            ("validator.temperature", self.validator.temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                anyhow::bail!("{label} must be between 0.0 and 2.0");
            }
        }
        if self.learning.pattern_threshold == 0 {
            anyhow::bail!("learning.pattern_threshold must be at least 1");
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            tracing::warn!("cache.max_entries is 0; cache will hold a single entry");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workflow.confidence_threshold, 85.0);
        assert_eq!(config.workflow.batch_size, 5);
        assert_eq!(config.learning.pattern_threshold, 3);
        assert_eq!(config.validator.temperature, 0.1);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [workflow]
            confidence_threshold = 90.0
            max_iterations = 2

            [workflow.node_weights]
            summary = 2.0

            [validator]
            provider = "anthropic"
            model = "claude-haiku-4-5"
            "#,
        )
        .unwrap();
        assert_eq!(config.workflow.confidence_threshold, 90.0);
        assert_eq!(config.workflow.max_iterations, 2);
        assert_eq!(config.workflow.batch_size, 5);
        assert_eq!(config.workflow.node_weights.get("summary"), Some(&2.0));
        assert_eq!(config.validator.provider, ProviderKind::Anthropic);
        assert_eq!(config.generator.primary_provider, ProviderKind::Anthropic);
    }

    #[test]
    fn modifiers_parse_from_toml() {
        let config = Config::from_toml_str(
            r#"
            [[generator.modifiers]]
            name = "exec"
            instruction = "Keep it brief."
            condition = { op = "eq", field = "audience", value = "executive" }
            "#,
        )
        .unwrap();
        assert_eq!(config.generator.modifiers.len(), 1);
        assert_eq!(config.generator.modifiers[0].name, "exec");
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let mut config = Config::default();
        config.workflow.confidence_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.workflow.max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.workflow.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generator.temperature = 3.0;
        assert!(config.validate().is_err());
    }
}
