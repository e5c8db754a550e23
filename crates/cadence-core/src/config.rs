use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub step: StepConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Capacity of the per-run streaming channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            name: None,
            event_buffer: default_event_buffer(),
        }
    }
}

/// Fallbacks for steps that do not configure their own retry/timeout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StepConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

impl StorageConfig {
    /// Resolve the database path (expand ~).
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_event_buffer() -> usize { 256 }
fn default_storage_path() -> String { "~/.cadence/workflows.db".to_string() }
fn default_log_filter() -> String { "cadence=info,warn".to_string() }

impl EngineConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| CadenceError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text, expanding `${ENV_VAR}` references first.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| CadenceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.workflow.event_buffer == 0 {
            return Err(CadenceError::Config(
                "workflow.event_buffer must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Default config location: `~/.cadence/config.toml`.
pub fn default_config_path() -> PathBuf {
    expand_home("~/.cadence/config.toml")
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("CADENCE_TEST_VAR", "hello");
        assert_eq!(expand_env_vars("x=${CADENCE_TEST_VAR}"), "x=hello");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        assert_eq!(
            expand_env_vars("${CADENCE_DEFINITELY_UNSET_VAR}"),
            "${CADENCE_DEFINITELY_UNSET_VAR}"
        );
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.workflow.event_buffer, 256);
        assert_eq!(config.step.max_retries, 0);
        assert!(config.step.timeout().is_none());
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.log.filter, "cadence=info,warn");
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        let err = EngineConfig::from_toml("[workflow]\nevent_buffer = 0\n").unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));
    }

    #[test]
    fn test_storage_path_resolution() {
        let absolute = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: "/var/lib/cadence/wf.db".into(),
        };
        assert_eq!(absolute.resolved_path(), PathBuf::from("/var/lib/cadence/wf.db"));

        if let Some(home) = dirs_home() {
            let tilde = StorageConfig::default();
            assert_eq!(tilde.resolved_path(), home.join(".cadence/workflows.db"));
        }
    }
}
