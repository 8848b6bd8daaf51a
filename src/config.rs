//! Agent configuration from environment variables

use crate::llm::DEFAULT_BASE_URL;
use crate::runtime::DEFAULT_COMPLETION_TIMEOUT;
use crate::transport::DEFAULT_MAILBOX_URL;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_AGENT_NAME: &str = "groq-example-agent";
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Groq API key; empty means completions will fail with an auth error
    pub groq_api_key: String,
    pub groq_base_url: String,
    pub agent_name: String,
    pub agent_seed: Option<String>,
    pub mailbox_key: Option<String>,
    pub mailbox_url: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub completion_timeout: Duration,
    pub strict_models: bool,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = match var("CHITCHAT_PORT") {
            Some(v) => parse_var("CHITCHAT_PORT", &v)?,
            None => DEFAULT_PORT,
        };

        let completion_timeout = match var("CHITCHAT_COMPLETION_TIMEOUT_SECS") {
            Some(v) => {
                let secs: u64 = parse_var("CHITCHAT_COMPLETION_TIMEOUT_SECS", &v)?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        name: "CHITCHAT_COMPLETION_TIMEOUT_SECS",
                        value: v,
                        reason: "must be at least 1".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_COMPLETION_TIMEOUT,
        };

        let strict_models = match var("CHITCHAT_STRICT_MODELS") {
            Some(v) => parse_bool("CHITCHAT_STRICT_MODELS", &v)?,
            None => false,
        };

        let db_path = var("CHITCHAT_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".chitchat-agent").join("agent.db")
            },
            PathBuf::from,
        );

        Ok(Self {
            groq_api_key: lookup("GROQ_API_KEY").unwrap_or_default(),
            groq_base_url: var("GROQ_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            agent_name: var("CHITCHAT_AGENT_NAME").unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
            agent_seed: var("CHITCHAT_AGENT_SEED"),
            mailbox_key: var("CHITCHAT_MAILBOX_KEY"),
            mailbox_url: var("CHITCHAT_MAILBOX_URL")
                .unwrap_or_else(|| DEFAULT_MAILBOX_URL.to_string()),
            port,
            db_path,
            completion_timeout,
            strict_models,
        })
    }
}

fn parse_var<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
