//! Configuration models for prefgen.
//!
//! Every tunable of a generation or cleanup run lives here and is
//! resolved from a TOML file at startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Top-level configuration for prefgen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chat completion API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Generation settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Near-duplicate settings
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// OpenAI-compatible API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key (can also be set via the env var named by `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the chat completions API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retry policy for a single generation call
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Retry policy injected into whatever performs the generation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts per call (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay schedule between attempts
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps (tests, local endpoints).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    /// Delay before the retry that follows `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Backoff schedule between attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    /// No delay
    None,
    /// `attempt * step_secs`
    Linear { step_secs: f64 },
    /// `base_secs * 2^(attempt - 1)`, capped at `max_secs`
    Exponential { base_secs: f64, max_secs: f64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Linear { step_secs: 5.0 }
    }
}

/// Upper bound on any single wait between attempts.
pub const MAX_BACKOFF_SECS: f64 = 3600.0;

/// Clamp a wait to `[0, MAX_BACKOFF_SECS]`; NaN becomes zero.
pub fn capped_delay(secs: f64) -> Duration {
    if secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs.clamp(0.0, MAX_BACKOFF_SECS))
}

impl Backoff {
    /// Delay after the given 1-based attempt, capped at [`MAX_BACKOFF_SECS`].
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = match *self {
            Backoff::None => 0.0,
            Backoff::Linear { step_secs } => step_secs * attempt as f64,
            Backoff::Exponential {
                base_secs,
                max_secs,
            } => {
                let exp = attempt.saturating_sub(1).min(30) as i32;
                (base_secs * 2f64.powi(exp)).min(max_secs)
            }
        };
        capped_delay(secs)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let fields = match *self {
            Backoff::None => vec![],
            Backoff::Linear { step_secs } => vec![("step_secs", step_secs)],
            Backoff::Exponential {
                base_secs,
                max_secs,
            } => vec![("base_secs", base_secs), ("max_secs", max_secs)],
        };
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 || value > MAX_BACKOFF_SECS {
                return Err(ConfigError::Invalid(format!(
                    "api.retry.backoff.{name} must be between 0 and {MAX_BACKOFF_SECS}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Model ID passed to the API
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum completion tokens per batch call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Number of validated records to produce
    #[serde(default = "default_total_records")]
    pub total_records: usize,

    /// Draft items per API call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Quota targets are `total_records * quota_multiplier`
    #[serde(default = "default_quota_multiplier")]
    pub quota_multiplier: usize,

    /// Batches allowed to contain failures before the run stops
    #[serde(default = "default_retry_budget")]
    pub retry_budget: usize,

    /// Attempts per draft item before it is dropped
    #[serde(default = "default_max_item_attempts")]
    pub max_item_attempts: usize,

    /// Metadata schema file (JSON object of category -> values)
    #[serde(default = "default_metadata_file")]
    pub metadata_file: PathBuf,

    /// Directory containing theme files
    #[serde(default = "default_themes_dir")]
    pub themes_dir: PathBuf,

    /// Suffix identifying theme files
    #[serde(default = "default_themes_suffix")]
    pub themes_suffix: String,

    /// RNG seed for reproducible allocations
    #[serde(default)]
    pub seed: Option<u64>,

    /// Price per 1M input tokens in USD, for cost reporting
    #[serde(default)]
    pub input_price_per_1m: f64,

    /// Price per 1M output tokens in USD, for cost reporting
    #[serde(default)]
    pub output_price_per_1m: f64,
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_temperature() -> f64 {
    0.8
}

fn default_max_tokens() -> u32 {
    16_000
}

fn default_total_records() -> usize {
    1000
}

fn default_batch_size() -> usize {
    25
}

fn default_quota_multiplier() -> usize {
    1
}

fn default_retry_budget() -> usize {
    3
}

fn default_max_item_attempts() -> usize {
    3
}

fn default_metadata_file() -> PathBuf {
    PathBuf::from("meta_data.json.txt")
}

fn default_themes_dir() -> PathBuf {
    PathBuf::from("themeset")
}

fn default_themes_suffix() -> String {
    ".json.txt".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            total_records: default_total_records(),
            batch_size: default_batch_size(),
            quota_multiplier: default_quota_multiplier(),
            retry_budget: default_retry_budget(),
            max_item_attempts: default_max_item_attempts(),
            metadata_file: default_metadata_file(),
            themes_dir: default_themes_dir(),
            themes_suffix: default_themes_suffix(),
            seed: None,
            input_price_per_1m: 0.0,
            output_price_per_1m: 0.0,
        }
    }
}

impl GenerationConfig {
    /// Total quota per metadata category.
    pub fn quota_total(&self) -> usize {
        self.total_records * self.quota_multiplier.max(1)
    }
}

/// Near-duplicate detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Threshold for the pair report
    #[serde(default = "default_report_threshold")]
    pub report_threshold: f64,

    /// Threshold for dataset reduction
    #[serde(default = "default_reduce_threshold")]
    pub reduce_threshold: f64,

    /// Record field holding the text to compare
    #[serde(default = "default_prompt_field")]
    pub prompt_field: String,
}

fn default_report_threshold() -> f64 {
    0.85
}

fn default_reduce_threshold() -> f64 {
    0.9
}

fn default_prompt_field() -> String {
    "prompt".to_string()
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            report_threshold: default_report_threshold(),
            reduce_threshold: default_reduce_threshold(),
            prompt_field: default_prompt_field(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving generated batch files
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Prefix of generated file names
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("rlhf")
}

fn default_file_prefix() -> String {
    "rlhf_batch".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.api.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.api.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.api.api_key_env.clone(),
        })
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.generation;
        if g.batch_size == 0 {
            return Err(ConfigError::Invalid("generation.batch_size must be > 0".into()));
        }
        if g.max_item_attempts == 0 {
            return Err(ConfigError::Invalid(
                "generation.max_item_attempts must be > 0".into(),
            ));
        }
        if self.api.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("api.retry.max_attempts must be > 0".into()));
        }
        self.api.retry.backoff.check()?;
        for (name, value) in [
            ("dedup.report_threshold", self.dedup.report_threshold),
            ("dedup.reduce_threshold", self.dedup.reduce_threshold),
            ("generation.input_price_per_1m", g.input_price_per_1m),
            ("generation.output_price_per_1m", g.output_price_per_1m),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or api.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.generation.batch_size, 25);
        assert_eq!(config.generation.model, "gpt-4.1");
        assert_eq!(config.dedup.reduce_threshold, 0.9);
        assert_eq!(config.dedup.report_threshold, 0.85);
        assert_eq!(config.api.retry, RetryPolicy::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_retry_policy() {
        let config = Config::from_toml_str(
            r#"
[api.retry]
max_attempts = 5
backoff = { kind = "exponential", base_secs = 1.0, max_secs = 8.0 }

[generation]
total_records = 10
quota_multiplier = 3
"#,
        )
        .unwrap();

        assert_eq!(config.api.retry.max_attempts, 5);
        assert_eq!(config.generation.quota_total(), 30);
        assert_eq!(config.api.retry.delay_after(1), Duration::from_secs(1));
        assert_eq!(config.api.retry.delay_after(3), Duration::from_secs(4));
        assert_eq!(config.api.retry.delay_after(10), Duration::from_secs(8));
    }

    #[test]
    fn test_linear_backoff_matches_attempt() {
        let backoff = Backoff::Linear { step_secs: 5.0 };
        assert_eq!(backoff.delay(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(3), Duration::from_secs(15));
        assert_eq!(Backoff::None.delay(7), Duration::ZERO);
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let huge = Backoff::Linear { step_secs: f64::INFINITY };
        assert_eq!(huge.delay(2), Duration::from_secs(3600));

        let wide = Backoff::Exponential {
            base_secs: 1e300,
            max_secs: f64::INFINITY,
        };
        assert_eq!(wide.delay(30), Duration::from_secs(3600));

        let nan = Backoff::Linear { step_secs: f64::NAN };
        assert_eq!(nan.delay(1), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_unbounded_backoff() {
        let config = Config::from_toml_str(
            r#"
[api.retry]
backoff = { kind = "exponential", base_secs = 1.0, max_secs = inf }
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("max_secs")));

        let mut config = Config::default();
        config.api.retry.backoff = Backoff::Linear { step_secs: 1e12 };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.api.retry.backoff = Backoff::Linear { step_secs: 30.0 };
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_negative_price() {
        let mut config = Config::default();
        config.generation.output_price_per_1m = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("output_price")));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = Config::default();
        config.generation.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let mut config = Config::default();
        config.api.api_key = Some("sk-test".into());
        config.api.api_key_env = "PREFGEN_TEST_UNSET_VAR".into();
        assert_eq!(config.resolve_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = Config::default();
        config.api.api_key_env = "PREFGEN_TEST_DEFINITELY_UNSET".into();
        assert!(matches!(
            config.resolve_api_key(),
            Err(ConfigError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn test_expand_env_vars_leaves_unknown_placeholder() {
        assert_eq!(
            expand_env_vars("key-${PREFGEN_TEST_NOT_SET_ANYWHERE}"),
            "key-${PREFGEN_TEST_NOT_SET_ANYWHERE}"
        );
    }
}
