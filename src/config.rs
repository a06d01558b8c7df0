use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::constants::{
    DEFAULT_TIMEOUT_MS, DEFAULT_WORK_DIR, FLUSH_GRACE_MS, JVM_TIMEOUT_MS, MAX_BUFFER,
    MAX_DATA_BUFFER, SHELL_TIMEOUT_MS,
};
use crate::core::domain::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "shovel", version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the engine configuration file (JSON)
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<PathBuf>,

    /// Path to the run request (JSON). Read from stdin when omitted
    #[arg(long = "request", short = 'r')]
    pub request_path: Option<PathBuf>,

    /// Override the output format of the request
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Print the wall time after plain-text output
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl CliArgs {
    /// Load the configuration from the specified file, or fall back to defaults
    pub fn to_config(&self) -> Result<EngineConfig, ConfigError> {
        match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                let reader = std::io::BufReader::new(file);
                Ok(serde_json::from_reader(reader)?)
            }
            None => Ok(EngineConfig::default()),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub work_dir: PathBuf,
    pub timeouts: TimeoutConfig,
    pub limits: Limits,
    pub shell_timeout_ms: u64,
    /// Sidecar service name -> shell command that starts it
    pub services: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            timeouts: TimeoutConfig::default(),
            limits: Limits::default(),
            shell_timeout_ms: SHELL_TIMEOUT_MS,
            services: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Wall-clock budget for a run: explicit request value, then the
    /// language table, then the global default.
    pub fn timeout_for(&self, language: &str, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .or_else(|| self.timeouts.per_language.get(language).copied())
            .unwrap_or(self.timeouts.default);
        Duration::from_millis(ms)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_millis(self.shell_timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default: u64,
    pub per_language: HashMap<String, u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let per_language = ["clojure", "java", "groovy", "scala", "kotlin"]
            .into_iter()
            .map(|lang| (lang.to_string(), JVM_TIMEOUT_MS))
            .collect();

        Self {
            default: DEFAULT_TIMEOUT_MS,
            per_language,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct Limits {
    pub max_chunk_bytes: usize,
    pub max_stdout_bytes: usize,
    pub flush_grace_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_chunk_bytes: MAX_DATA_BUFFER,
            max_stdout_bytes: MAX_BUFFER,
            flush_grace_ms: FLUSH_GRACE_MS,
        }
    }
}

impl Limits {
    pub fn flush_grace(&self) -> Duration {
        Duration::from_millis(self.flush_grace_ms)
    }
}
