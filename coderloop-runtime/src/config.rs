//! Configuration
//!
//! YAML-backed settings for the transport, the loop and the log directory.
//! Built once at startup and passed explicitly. Required keys have no
//! defaults: a missing one is a `ConfigInvalid` error.

use crate::error::{Error, Result};
use crate::provider::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when `llm.api_key` is absent
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level configuration (maps to YAML).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub llm: LlmSettings,
    pub agent: AgentSettings,
    /// Where session logs and transcripts are written
    pub log_dir: PathBuf,
    /// Parent directory of generated project workspaces
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,
    /// Markdown context and `skills/` directory
    #[serde(default = "default_context_dir")]
    pub context_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSettings {
    /// Model calls allowed per build before stopping
    pub max_iterations: usize,
    /// Messages kept verbatim across compaction
    pub tail_length: usize,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,
}

fn default_projects_root() -> PathBuf {
    PathBuf::from("generated_projects")
}

fn default_context_dir() -> PathBuf {
    PathBuf::from("context")
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_summary_max_tokens() -> usize {
    800
}

fn default_shell_timeout_secs() -> u64 {
    20
}

impl AppConfig {
    /// Load and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config_invalid(format!("cannot read config {}: {}", path.display(), e))
                .with_operation("config::load")
                .set_source(e)
        })?;
        let config = Self::from_yaml(&text)
            .map_err(|e| e.with_context("path", path.display().to_string()))?;
        tracing::info!(path = %path.display(), model = %config.llm.model, "loaded configuration");
        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(text).map_err(|e| {
            Error::config_invalid(e.to_string())
                .with_operation("config::parse")
                .set_source(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::config_invalid(msg).with_operation("config::validate"));

        if self.llm.base_url.trim().is_empty() {
            return invalid("llm.base_url must not be empty".into());
        }
        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://") {
            return invalid(format!("llm.base_url '{}' must be an http(s) URL", self.llm.base_url));
        }
        if self.llm.model.trim().is_empty() {
            return invalid("llm.model must not be empty".into());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return invalid(format!("llm.temperature {} must be within 0..=2", self.llm.temperature));
        }
        if self.llm.max_tokens == 0 {
            return invalid("llm.max_tokens must be positive".into());
        }
        if self.llm.timeout_secs == 0 {
            return invalid("llm.timeout_secs must be positive".into());
        }
        if self.agent.max_iterations == 0 {
            return invalid("agent.max_iterations must be positive".into());
        }
        if self.agent.tail_length == 0 {
            return invalid("agent.tail_length must be positive".into());
        }
        if self.agent.summary_max_tokens == 0 {
            return invalid("agent.summary_max_tokens must be positive".into());
        }
        if self.agent.shell_timeout_secs == 0 {
            return invalid("agent.shell_timeout_secs must be positive".into());
        }
        if self.log_dir.as_os_str().is_empty() {
            return invalid("log_dir must not be empty".into());
        }
        Ok(())
    }

    /// API key from config, falling back to the environment
    pub fn api_key(&self) -> Option<String> {
        self.llm
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
    }

    pub fn provider_config(&self) -> ProviderConfig {
        let config = ProviderConfig::openai_compatible(&self.llm.base_url, &self.llm.model)
            .with_timeout(self.llm.timeout_secs);
        match self.api_key() {
            Some(key) => config.with_api_key(key),
            None => config,
        }
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.shell_timeout_secs)
    }
}
