use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub entropy: EntropyConfig,
    #[serde(default)]
    pub penalty: PenaltyConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    pub sieve: SieveConfig,
    pub upstream: UpstreamConfig,
    /// Optional observability configuration
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
}

/// Observability configuration for distributed tracing
#[derive(Debug, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP endpoint for distributed tracing (e.g., "http://tempo.example.com:4317")
    /// If not set, falls back to OTEL_EXPORTER_OTLP_ENDPOINT env var
    pub otlp_endpoint: Option<String>,
}

/// Shannon entropy thresholds for the three-way prompt classification.
#[derive(Debug, Clone, Deserialize)]
pub struct EntropyConfig {
    /// H at or below this is CLEAN (default: 5.5)
    #[serde(default = "default_clean_max")]
    pub clean_max: f64,
    /// H above this is WEIRD and blocked (default: 6.5)
    #[serde(default = "default_weird_min")]
    pub weird_min: f64,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            clean_max: default_clean_max(),
            weird_min: default_weird_min(),
        }
    }
}

fn default_clean_max() -> f64 {
    5.5
}

fn default_weird_min() -> f64 {
    6.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct PenaltyConfig {
    /// Decayed score at or above this puts a caller in the penalty box (default: 2.5)
    #[serde(default = "default_penalty_threshold")]
    pub threshold: f64,
    /// Score half-life in seconds (default: 600)
    #[serde(default = "default_half_life")]
    pub half_life_seconds: u64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            threshold: default_penalty_threshold(),
            half_life_seconds: default_half_life(),
        }
    }
}

fn default_penalty_threshold() -> f64 {
    2.5
}

fn default_half_life() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompressionConfig {
    /// Baseline sieve aggressiveness (default: 0.5)
    #[serde(default = "default_base_level")]
    pub base_level: f64,
    /// Aggressiveness for SUSPICIOUS prompts (default: 0.7)
    #[serde(default = "default_suspicious_level")]
    pub suspicious_level: f64,
    /// Aggressiveness for callers in the penalty box (default: 0.8)
    #[serde(default = "default_penalised_level")]
    pub penalised_level: f64,
    /// Savings percentage at or above which attack probability is HIGH (default: 80)
    #[serde(default = "default_attack_threshold")]
    pub attack_threshold_pct: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            base_level: default_base_level(),
            suspicious_level: default_suspicious_level(),
            penalised_level: default_penalised_level(),
            attack_threshold_pct: default_attack_threshold(),
        }
    }
}

fn default_base_level() -> f64 {
    0.5
}

fn default_suspicious_level() -> f64 {
    0.7
}

fn default_penalised_level() -> f64 {
    0.8
}

fn default_attack_threshold() -> f64 {
    80.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Sieve request timeout in seconds (default: 30)
    #[serde(default = "default_sieve_timeout")]
    pub sieve_s: u64,
    /// Judge request timeout in seconds (default: 30)
    #[serde(default = "default_judge_timeout")]
    pub judge_s: u64,
    /// Upstream completion timeout in seconds (default: 60)
    #[serde(default = "default_upstream_timeout")]
    pub upstream_s: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            sieve_s: default_sieve_timeout(),
            judge_s: default_judge_timeout(),
            upstream_s: default_upstream_timeout(),
        }
    }
}

fn default_sieve_timeout() -> u64 {
    30
}

fn default_judge_timeout() -> u64 {
    30
}

fn default_upstream_timeout() -> u64 {
    60
}

/// Signature scanner pattern families. Patterns are data so they can be
/// updated without recompiling the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Role-hijack regex patterns, matched case-insensitively
    #[serde(default = "default_role_hijack")]
    pub role_hijack: Vec<String>,
    /// Instruction-override regex patterns, matched case-insensitively
    #[serde(default = "default_instruction_override")]
    pub instruction_override: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            role_hijack: default_role_hijack(),
            instruction_override: default_instruction_override(),
        }
    }
}

fn default_role_hijack() -> Vec<String> {
    [
        r"you\s+are\s+now\s+(?:an?\s+)?(?:admin|administrator|root|superuser)",
        r"you\s+are\s+(?:now\s+)?(?:a\s+)?(?:developer|programmer|coder)",
        r"act\s+as\s+(?:if\s+you\s+are\s+)?(?:an?\s+)?(?:admin|developer|system)",
        r"pretend\s+you\s+are\s+(?:an?\s+)?(?:admin|developer|system)",
        r"from\s+now\s+on\s+you\s+are\s+(?:an?\s+)?(?:admin|developer)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_instruction_override() -> Vec<String> {
    [
        r"ignore\s+(?:all\s+)?(?:previous\s+)?(?:instructions|rules|guidelines)",
        r"forget\s+(?:all\s+)?(?:previous\s+)?(?:instructions|rules|guidelines)",
        r"disregard\s+(?:all\s+)?(?:previous\s+)?(?:instructions|rules|the\s+system\s+prompt)",
        r"override\s+(?:all\s+)?(?:previous\s+)?(?:instructions|rules)",
        r"system\s+override",
        r"bypass\s+(?:all\s+)?(?:previous\s+)?(?:instructions|rules)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct JudgeConfig {
    /// Whether SUSPICIOUS prompts are adjudicated by the judge LLM (default: true)
    #[serde(default = "default_judge_enabled")]
    pub enabled: bool,
    /// Chat-completions endpoint of the judge provider
    pub url: Option<String>,
    /// Model name sent to the judge provider
    pub model: Option<String>,
    /// Environment variable containing the judge API key
    pub api_key_env: Option<String>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: default_judge_enabled(),
            url: None,
            model: None,
            api_key_env: None,
        }
    }
}

fn default_judge_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SieveConfig {
    /// Compression service endpoint
    pub url: String,
    /// Environment variable containing the sieve API key
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Chat-completions endpoint of the upstream provider
    pub url: String,
    /// Model used when the client request names none
    pub default_model: Option<String>,
    /// Environment variable containing the upstream API key
    pub api_key_env: Option<String>,
}

pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "failed to parse config file")?;

    if config.judge.enabled && config.judge.url.is_none() {
        bail!("judge.enabled is true but judge.url is not set");
    }
    if config.entropy.clean_max > config.entropy.weird_min {
        bail!(
            "entropy.clean_max ({}) must not exceed entropy.weird_min ({})",
            config.entropy.clean_max,
            config.entropy.weird_min
        );
    }

    Ok(config)
}

/// Resolve a secret from the environment variable named in config.
/// Missing variables are treated as "no credential configured".
pub fn resolve_secret(key_env: &Option<String>) -> Option<String> {
    key_env.as_ref().and_then(|name| std::env::var(name).ok())
}
