//! Runtime configuration.
//!
//! Layering, lowest to highest: built-in defaults, an optional TOML file,
//! `PRINTFIX_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::{EffortLevel, JobStoreConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Per-effort bundle of model choices, iteration budget and planning strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffortConfig {
    /// Model used by the visual diagnosis service.
    pub visual_model: String,
    /// Overrides the planning endpoint's default model when set.
    #[serde(default)]
    pub planning_model: Option<String>,
    pub max_fix_iterations: u32,
    /// Plan with the model instead of the rule table.
    pub use_ai_planning: bool,
    /// Ask the diagnosis service for a model-assisted merge.
    pub use_ai_merge: bool,
    /// Pages sampled for visual diagnosis; `None` samples every page.
    #[serde(default)]
    pub max_pages_sampled: Option<u32>,
    pub page_batch_size: u32,
}

impl EffortConfig {
    pub fn quick() -> Self {
        Self {
            visual_model: "gemini-2.0-flash-lite".into(),
            planning_model: None,
            max_fix_iterations: 2,
            use_ai_planning: false,
            use_ai_merge: false,
            max_pages_sampled: Some(10),
            page_batch_size: 4,
        }
    }

    pub fn standard() -> Self {
        Self {
            visual_model: "gemini-2.0-flash".into(),
            planning_model: None,
            max_fix_iterations: 3,
            use_ai_planning: false,
            use_ai_merge: false,
            max_pages_sampled: None,
            page_batch_size: 4,
        }
    }

    pub fn thorough() -> Self {
        Self {
            visual_model: "gemini-2.0-flash".into(),
            planning_model: None,
            max_fix_iterations: 5,
            use_ai_planning: true,
            use_ai_merge: true,
            max_pages_sampled: None,
            page_batch_size: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffortPresets {
    pub quick: EffortConfig,
    pub standard: EffortConfig,
    pub thorough: EffortConfig,
}

impl Default for EffortPresets {
    fn default() -> Self {
        Self {
            quick: EffortConfig::quick(),
            standard: EffortConfig::standard(),
            thorough: EffortConfig::thorough(),
        }
    }
}

impl EffortPresets {
    pub fn get(&self, level: EffortLevel) -> &EffortConfig {
        match level {
            EffortLevel::Quick => &self.quick,
            EffortLevel::Standard => &self.standard,
            EffortLevel::Thorough => &self.thorough,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests: u64,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 60,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// OpenAI-compatible chat-completions endpoint used for plan generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningEndpoint {
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintfixConfig {
    /// Root of per-job artifact directories.
    pub storage_dir: PathBuf,
    pub job_ttl_secs: u64,
    pub strict_transitions: bool,
    pub rate_limit: RateLimitConfig,
    /// Upper bound on a single fix tool invocation.
    pub fix_timeout_secs: u64,
    /// Back up, validate and roll back around every fix.
    pub validate_after_fix: bool,
    /// Upper bound on a single planning-model call.
    pub ai_timeout_secs: u64,
    pub retry: RetryConfig,
    pub planning: Option<PlanningEndpoint>,
    pub effort: EffortPresets,
}

impl Default for PrintfixConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./storage"),
            job_ttl_secs: 86_400,
            strict_transitions: false,
            rate_limit: RateLimitConfig::default(),
            fix_timeout_secs: 120,
            validate_after_fix: true,
            ai_timeout_secs: 60,
            retry: RetryConfig::default(),
            planning: None,
            effort: EffortPresets::default(),
        }
    }
}

impl PrintfixConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse printfix config TOML")
    }

    /// Override fields from `PRINTFIX_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            raw.trim()
                .parse()
                .with_context(|| format!("Invalid value for {key}: {raw:?}"))
        }

        macro_rules! env_override {
            ($key:literal => $field:expr) => {
                if let Some(raw) = lookup($key) {
                    $field = parse($key, raw)?;
                }
            };
        }

        if let Some(dir) = lookup("PRINTFIX_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        env_override!("PRINTFIX_JOB_TTL_SECS" => self.job_ttl_secs);
        env_override!("PRINTFIX_STRICT_TRANSITIONS" => self.strict_transitions);
        env_override!("PRINTFIX_RATE_LIMIT_REQUESTS" => self.rate_limit.requests);
        env_override!("PRINTFIX_RATE_LIMIT_WINDOW_SECS" => self.rate_limit.window_secs);
        env_override!("PRINTFIX_FIX_TIMEOUT_SECS" => self.fix_timeout_secs);
        env_override!("PRINTFIX_VALIDATE_AFTER_FIX" => self.validate_after_fix);
        env_override!("PRINTFIX_AI_TIMEOUT_SECS" => self.ai_timeout_secs);
        env_override!("PRINTFIX_RETRY_MAX" => self.retry.max_retries);
        env_override!("PRINTFIX_RETRY_BASE_MS" => self.retry.base_delay_ms);
        env_override!("PRINTFIX_RETRY_MAX_DELAY_MS" => self.retry.max_delay_ms);

        if let Some(url) = lookup("PRINTFIX_PLANNING_URL") {
            let model = lookup("PRINTFIX_PLANNING_MODEL")
                .or_else(|| self.planning.as_ref().map(|p| p.model.clone()))
                .unwrap_or_else(|| "gpt-4o-mini".into());
            let api_key = lookup("PRINTFIX_PLANNING_API_KEY")
                .or_else(|| self.planning.as_ref().and_then(|p| p.api_key.clone()));
            self.planning = Some(PlanningEndpoint {
                url,
                model,
                api_key,
            });
        } else if let Some(planning) = self.planning.as_mut() {
            if let Some(model) = lookup("PRINTFIX_PLANNING_MODEL") {
                planning.model = model;
            }
            if let Some(key) = lookup("PRINTFIX_PLANNING_API_KEY") {
                planning.api_key = Some(key);
            }
        }
        Ok(())
    }

    pub fn job_store_config(&self) -> JobStoreConfig {
        JobStoreConfig {
            ttl: Duration::from_secs(self.job_ttl_secs),
            strict_transitions: self.strict_transitions,
        }
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_secs(self.fix_timeout_secs)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }
}
