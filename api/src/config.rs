//! Startup configuration read from the environment.

use std::time::Duration;

use covrabl_core::scores::AdequacyThresholds;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const THRESHOLD_PREFIX: &str = "COVRABL_THRESHOLD_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value '{value}'")]
    Invalid { name: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
    Disabled,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub llm: LlmConfig,
    pub thresholds: AdequacyThresholds,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let port = match var("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT".to_string(),
                value: raw,
            })?,
            None => DEFAULT_PORT,
        };

        let cors_origins = var("COVRABL_CORS_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let timeout_secs = match var("COVRABL_LLM_TIMEOUT_SECS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "COVRABL_LLM_TIMEOUT_SECS".to_string(),
                value: raw,
            })?,
            None => DEFAULT_LLM_TIMEOUT_SECS,
        };

        let requested = var("COVRABL_LLM_PROVIDER").unwrap_or_else(|| "anthropic".to_string());
        let (provider, api_key, default_model) = match requested.to_lowercase().as_str() {
            "anthropic" => (
                LlmProvider::Anthropic,
                var("ANTHROPIC_API_KEY"),
                DEFAULT_ANTHROPIC_MODEL,
            ),
            "openai" => (
                LlmProvider::OpenAi,
                var("OPENAI_API_KEY"),
                DEFAULT_OPENAI_MODEL,
            ),
            "disabled" | "none" => (LlmProvider::Disabled, None, ""),
            _ => {
                return Err(ConfigError::Invalid {
                    name: "COVRABL_LLM_PROVIDER".to_string(),
                    value: requested,
                });
            }
        };
        let (provider, api_key) = match api_key {
            Some(key) => (provider, key),
            None => (LlmProvider::Disabled, String::new()),
        };

        let llm = LlmConfig {
            provider,
            api_key,
            model: var("COVRABL_LLM_MODEL").unwrap_or_else(|| default_model.to_string()),
            timeout: Duration::from_secs(timeout_secs),
        };

        let mut thresholds = AdequacyThresholds::default();
        for (name, slot) in thresholds.entries_mut() {
            let env_name = format!("{THRESHOLD_PREFIX}{}", name.to_uppercase());
            if let Some(raw) = var(&env_name) {
                *slot = raw
                    .parse::<i64>()
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or(ConfigError::Invalid {
                        name: env_name,
                        value: raw,
                    })?;
            }
        }

        Ok(Config {
            database_url,
            port,
            cors_origins,
            llm,
            thresholds,
        })
    }
}
