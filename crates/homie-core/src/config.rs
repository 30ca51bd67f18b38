use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{HomieError, Result};

/// Top-level config (`homie.toml` + `HOMIE_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomieConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub proactive: ProactiveConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Default for HomieConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            behavior: BehaviorConfig::default(),
            proactive: ProactiveConfig::default(),
            memory: MemoryConfig::default(),
            tools: ToolsConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl HomieConfig {
    /// Load config from a TOML file with `HOMIE_*` env var overrides.
    ///
    /// Checks, in order: an explicit path argument, then `~/.homie/homie.toml`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("HOMIE_").split("_"))
            .extract()
            .map_err(|e| HomieError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.homie/homie.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderConfig,
    pub models: ModelSlots,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            models: ModelSlots::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenaiCompatible,
    ClaudeCode,
    CodexCli,
    Mpp,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSlots {
    #[serde(default = "default_model")]
    pub default: String,
    #[serde(default = "default_fast_model")]
    pub fast: String,
}

impl Default for ModelSlots {
    fn default() -> Self {
        Self {
            default: default_model(),
            fast: default_fast_model(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_fast_model() -> String {
    "claude-haiku-4-5".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_sleep_start")]
    pub start_local: String,
    #[serde(default = "default_sleep_end")]
    pub end_local: String,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timezone: default_timezone(),
            start_local: default_sleep_start(),
            end_local: default_sleep_end(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_sleep_start() -> String {
    "23:00".to_string()
}
fn default_sleep_end() -> String {
    "07:00".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default)]
    pub sleep: SleepConfig,
    #[serde(default = "default_group_max_chars")]
    pub group_max_chars: usize,
    #[serde(default = "default_dm_max_chars")]
    pub dm_max_chars: usize,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: i64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: i64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: i64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            sleep: SleepConfig::default(),
            group_max_chars: default_group_max_chars(),
            dm_max_chars: default_dm_max_chars(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_group_max_chars() -> usize {
    600
}
fn default_dm_max_chars() -> usize {
    1200
}
fn default_min_delay_ms() -> i64 {
    500
}
fn default_max_delay_ms() -> i64 {
    4000
}
fn default_debounce_ms() -> i64 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeLimits {
    #[serde(default = "default_max_per_day")]
    pub max_per_day: u32,
    #[serde(default = "default_max_per_week")]
    pub max_per_week: u32,
    #[serde(default = "default_cooldown_after_user_ms")]
    pub cooldown_after_user_ms: i64,
    #[serde(default = "default_pause_after_ignored")]
    pub pause_after_ignored: u32,
}

impl Default for ScopeLimits {
    fn default() -> Self {
        Self {
            max_per_day: default_max_per_day(),
            max_per_week: default_max_per_week(),
            cooldown_after_user_ms: default_cooldown_after_user_ms(),
            pause_after_ignored: default_pause_after_ignored(),
        }
    }
}

fn default_max_per_day() -> u32 {
    3
}
fn default_max_per_week() -> u32 {
    10
}
fn default_cooldown_after_user_ms() -> i64 {
    6 * 60 * 60 * 1000
}
fn default_pause_after_ignored() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_skip_rate")]
    pub skip_rate: f64,
    #[serde(default)]
    pub dm: ScopeLimits,
    #[serde(default)]
    pub group: ScopeLimits,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            skip_rate: default_skip_rate(),
            dm: ScopeLimits::default(),
            group: ScopeLimits::default(),
        }
    }
}

impl ProactiveConfig {
    pub fn limits_for(&self, is_group: bool) -> &ScopeLimits {
        if is_group {
            &self.group
        } else {
            &self.dm
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_heartbeat_interval_ms() -> u64 {
    60_000
}
fn default_skip_rate() -> f64 {
    0.15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_capsule_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: default_capsule_max_tokens(),
        }
    }
}

fn default_capsule_max_tokens() -> u32 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            half_life_days: default_half_life_days(),
        }
    }
}

fn default_half_life_days() -> f64 {
    30.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_fts_weight")]
    pub fts_weight: f64,
    #[serde(default = "default_vec_weight")]
    pub vec_weight: f64,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            fts_weight: default_fts_weight(),
            vec_weight: default_vec_weight(),
            recency_weight: default_recency_weight(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_fts_weight() -> f64 {
    0.6
}
fn default_vec_weight() -> f64 {
    0.4
}
fn default_recency_weight() -> f64 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFeedbackConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_finalize_after_ms")]
    pub finalize_after_ms: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
}

impl Default for MemoryFeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            finalize_after_ms: default_finalize_after_ms(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_finalize_after_ms() -> u64 {
    60_000
}
fn default_success_threshold() -> f64 {
    0.6
}
fn default_failure_threshold() -> f64 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_context_budget_tokens")]
    pub context_budget_tokens: u32,
    #[serde(default)]
    pub capsule: CapsuleConfig,
    #[serde(default)]
    pub decay: DecayConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub feedback: MemoryFeedbackConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_budget_tokens: default_context_budget_tokens(),
            capsule: CapsuleConfig::default(),
            decay: DecayConfig::default(),
            retrieval: RetrievalConfig::default(),
            feedback: MemoryFeedbackConfig::default(),
        }
    }
}

fn default_context_budget_tokens() -> u32 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolTierConfig {
    #[serde(default)]
    pub enabled_for_operator: bool,
    #[serde(default)]
    pub allow_all: bool,
    #[serde(default)]
    pub allowlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub restricted: ToolTierConfig,
    #[serde(default)]
    pub dangerous: ToolTierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_project_dir")]
    pub project_dir: String,
    #[serde(default = "default_identity_dir")]
    pub identity_dir: String,
    #[serde(default = "default_skills_dir")]
    pub skills_dir: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            identity_dir: default_identity_dir(),
            skills_dir: default_skills_dir(),
            data_dir: default_data_dir(),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}
fn default_project_dir() -> String {
    format!("{}/.homie", home_dir())
}
fn default_identity_dir() -> String {
    format!("{}/.homie/identity", home_dir())
}
fn default_skills_dir() -> String {
    format!("{}/.homie/skills", home_dir())
}
fn default_data_dir() -> String {
    format!("{}/.homie/data", home_dir())
}
