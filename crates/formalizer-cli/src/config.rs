//! TOML configuration for the `formalizer` binary.
//!
//! Every section is optional; missing keys take their defaults. The API key
//! and base URL can also come from the environment:
//! - `FORMALIZER_API_KEY`: model API key (overrides `llm.api_key`)
//! - `FORMALIZER_API_BASE`: model API base URL (overrides `llm.api_base_url`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use formalizer_agent::{LlmConfig, SearchConfig};
use formalizer_check::LeanConfig;
use formalizer_core::{ConfigError, RunConfig};
use formalizer_synth::PipelineError;
use serde::{Deserialize, Serialize};

pub const API_KEY_VAR: &str = "FORMALIZER_API_KEY";
pub const API_BASE_VAR: &str = "FORMALIZER_API_BASE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeanSection {
    pub sandbox_path: PathBuf,
    pub lake_path: PathBuf,
    pub lean_path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for LeanSection {
    fn default() -> Self {
        LeanSection {
            sandbox_path: PathBuf::from("lean_sandbox"),
            lake_path: PathBuf::from("lake"),
            lean_path: PathBuf::from("lean"),
            timeout_secs: 120,
        }
    }
}

impl LeanSection {
    pub fn to_lean_config(&self) -> LeanConfig {
        LeanConfig {
            sandbox_path: self.sandbox_path.clone(),
            lake_path: self.lake_path.clone(),
            lean_path: self.lean_path.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormalizerConfig {
    pub run: RunConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub lean: LeanSection,
}

impl FormalizerConfig {
    /// Reads `path` if given, else starts from defaults, then applies the
    /// environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => FormalizerConfig::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Run validation plus cross-section checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run.validate()?;
        let window = self.search.retry_window();
        if window > self.run.call_timeout() {
            return Err(ConfigError {
                field: "search",
                reason: format!(
                    "retries can take {}s, longer than run.call_timeout_secs ({}s)",
                    window.as_secs(),
                    self.run.call_timeout_secs
                ),
            });
        }
        Ok(())
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError {
            field: "config file",
            reason: err.to_string(),
        })
    }

    /// Overrides provider settings from `lookup` (normally the process
    /// environment). Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty(API_KEY_VAR) {
            self.llm.api_key = Some(key);
        }
        if let Some(base) = non_empty(API_BASE_VAR) {
            self.llm.api_base_url = base;
        }
    }
}
