//! Runtime configuration.
//!
//! Loaded from YAML with serde defaults for every field, then layered with
//! `PLAN_ENGINE_*` environment overrides. Nothing here is global: the service
//! receives an [`AppConfig`] at construction.

use crate::errors::{AppError, AppResult};
use crate::models::{DAYS_PER_WEEK, QUARTERS_PER_YEAR, WEEKS_PER_QUARTER};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATA_DIR: &str = "PLAN_ENGINE_DATA_DIR";
pub const ENV_MODEL: &str = "PLAN_ENGINE_MODEL";
pub const ENV_ENDPOINT: &str = "PLAN_ENGINE_ENDPOINT";

const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const TOKENS_PER_DAY_ENTRY: u32 = 60;
const TOKENS_PER_WEEK_HEADER: u32 = 30;
const TOKENS_PER_QUARTER_HEADER: u32 = 120;
const TOKENS_DOCUMENT_OVERHEAD: u32 = 2_000;

/// Output tokens a fully expanded 4 x 13 x 7 plan needs.
pub fn estimated_full_plan_tokens() -> u32 {
    let quarters = u32::from(QUARTERS_PER_YEAR);
    let weeks = quarters * WEEKS_PER_QUARTER as u32;
    let days = weeks * DAYS_PER_WEEK as u32;
    days * TOKENS_PER_DAY_ENTRY
        + weeks * TOKENS_PER_WEEK_HEADER
        + quarters * TOKENS_PER_QUARTER_HEADER
        + TOKENS_DOCUMENT_OVERHEAD
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub endpoint_base: String,
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_output_tokens: 65_536,
            endpoint_base: DEFAULT_ENDPOINT.to_string(),
            request_timeout_secs: 180,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.model.trim().is_empty() {
            return Err(AppError::Config("generation model cannot be empty".to_string()));
        }
        if self.endpoint_base.trim().is_empty() {
            return Err(AppError::Config("generation endpoint cannot be empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AppError::Config(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        let required = estimated_full_plan_tokens();
        if self.max_output_tokens < required {
            return Err(AppError::Config(format!(
                "max_output_tokens {} cannot hold a full plan (needs at least {})",
                self.max_output_tokens, required
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MigrationConfig {
    pub stale_claim_secs: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self { stale_claim_secs: 300 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub generation: GenerationConfig,
    pub retry: RetryConfig,
    pub migration: MigrationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".plan-engine"),
            generation: GenerationConfig::default(),
            retry: RetryConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)?;
        config.generation.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> AppResult<Self> {
        if let Some(dir) = env_value(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(model) = env_value(ENV_MODEL) {
            self.generation.model = model;
        }
        if let Some(endpoint) = env_value(ENV_ENDPOINT) {
            self.generation.endpoint_base = endpoint;
        }
        self.generation.validate()?;
        Ok(self)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("state.sqlite")
    }

    pub fn local_store_dir(&self) -> PathBuf {
        self.data_dir.join("local")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{estimated_full_plan_tokens, AppConfig, GenerationConfig};
    use crate::errors::AppError;

    #[test]
    fn default_ceiling_holds_full_plan() {
        let config = GenerationConfig::default();
        assert!(config.max_output_tokens > estimated_full_plan_tokens());
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn rejects_ceiling_below_full_plan() {
        let config = GenerationConfig {
            max_output_tokens: 8_192,
            ..GenerationConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = AppConfig::from_yaml(
            "data_dir: /tmp/plans\ngeneration:\n  model: gemini-2.5-pro\nretry:\n  backoff_ms: 10\n",
        )
        .expect("config");
        assert_eq!(config.data_dir.to_string_lossy(), "/tmp/plans");
        assert_eq!(config.generation.model, "gemini-2.5-pro");
        assert_eq!(config.generation.max_output_tokens, 65_536);
        assert_eq!(config.retry.backoff_ms, 10);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.migration.stale_claim_secs, 300);
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(AppConfig::from_yaml("").expect("config"), AppConfig::default());
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        assert!(matches!(
            AppConfig::from_yaml("generation: [unclosed"),
            Err(AppError::Config(_))
        ));
    }
}
