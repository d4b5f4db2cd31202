use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::TimeDelta;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tallyhive_provider::ProviderConfig;
use tallyhive_temporal::{DEFAULT_GRACE_MINUTES, DEFAULT_TIMEZONE};

use crate::action_ledger::DEFAULT_LEDGER_CAPACITY;

/// Upper bound for the focus and task TTLs (one week).
pub const MAX_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: i64,
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
    #[serde(default = "default_focus_ttl_secs")]
    pub focus_ttl_secs: u64,
    #[serde(default = "default_task_ttl_secs")]
    pub task_ttl_secs: u64,
    #[serde(default = "default_valid_state_threshold")]
    pub valid_state_threshold: f64,
    #[serde(default)]
    pub nlu: NluConfig,
    #[serde(default = "default_true")]
    pub fallback_grammar: bool,
    /// Category applied to revenues nothing else could categorize. Unset
    /// means revenues stay uncategorized.
    #[serde(default)]
    pub revenue_default_category: Option<CategoryDefault>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluConfig {
    /// Provider id from `providers`; `None` runs on the offline stub.
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Prior turns forwarded to the model.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDefault {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default = "default_category_confidence")]
    pub confidence: f64,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_grace_minutes() -> i64 {
    DEFAULT_GRACE_MINUTES
}

fn default_ledger_capacity() -> usize {
    DEFAULT_LEDGER_CAPACITY
}

fn default_focus_ttl_secs() -> u64 {
    300
}

fn default_task_ttl_secs() -> u64 {
    600
}

fn default_valid_state_threshold() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_max_tokens() -> u32 {
    512
}

fn default_history_turns() -> usize {
    6
}

fn default_category_confidence() -> f64 {
    0.5
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            provider_id: None,
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            history_turns: default_history_turns(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            grace_minutes: default_grace_minutes(),
            ledger_capacity: default_ledger_capacity(),
            focus_ttl_secs: default_focus_ttl_secs(),
            task_ttl_secs: default_task_ttl_secs(),
            valid_state_threshold: default_valid_state_threshold(),
            nlu: NluConfig::default(),
            fallback_grammar: true,
            revenue_default_category: None,
            providers: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| anyhow!("invalid timezone: {}", self.timezone))
    }

    pub fn focus_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(self.focus_ttl_secs as i64)
    }

    pub fn task_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(self.task_ttl_secs as i64)
    }

    pub fn nlu_timeout(&self) -> Duration {
        Duration::from_secs(self.nlu.timeout_secs)
    }

    fn resolve_env_vars(&mut self) {
        self.timezone = resolve_env_var(&self.timezone);
        self.nlu.model = resolve_env_var(&self.nlu.model);
        for provider in &mut self.providers {
            provider.api_key = provider.api_key.as_deref().map(resolve_env_var);
            provider.base_url = provider.base_url.as_deref().map(resolve_env_var);
        }
    }
}

/// Expand `${KEY}` placeholders from the environment. Unset keys expand to "".
pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

pub fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let mut config: EngineConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))?;
    config.resolve_env_vars();
    validate_engine_config(&config)?;
    Ok(config)
}

pub fn validate_engine_config(config: &EngineConfig) -> Result<()> {
    config.tz()?;

    if config.grace_minutes < 0 {
        return Err(anyhow!("grace_minutes must not be negative"));
    }
    if config.ledger_capacity == 0 {
        return Err(anyhow!("ledger_capacity must be greater than zero"));
    }
    if config.focus_ttl_secs == 0 || config.task_ttl_secs == 0 {
        return Err(anyhow!("focus_ttl_secs and task_ttl_secs must be greater than zero"));
    }
    if config.focus_ttl_secs > MAX_TTL_SECS || config.task_ttl_secs > MAX_TTL_SECS {
        return Err(anyhow!(
            "focus_ttl_secs and task_ttl_secs must not exceed {MAX_TTL_SECS}"
        ));
    }
    if config.nlu.timeout_secs == 0 {
        return Err(anyhow!("nlu.timeout_secs must be greater than zero"));
    }
    if !(0.0..=1.0).contains(&config.valid_state_threshold) {
        return Err(anyhow!(
            "valid_state_threshold must be within 0..=1, got {}",
            config.valid_state_threshold
        ));
    }
    if let Some(default) = &config.revenue_default_category {
        if default.category.trim().is_empty() {
            return Err(anyhow!("revenue_default_category.category must not be empty"));
        }
        if !(0.0..=1.0).contains(&default.confidence) {
            return Err(anyhow!("revenue_default_category.confidence must be within 0..=1"));
        }
    }
    if let Some(id) = &config.nlu.provider_id {
        if !config.providers.iter().any(|p| &p.id == id) {
            return Err(anyhow!("nlu.provider_id does not exist in providers: {id}"));
        }
    }

    Ok(())
}
