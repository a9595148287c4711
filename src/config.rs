use crate::defaults;
use crate::error::{Result, SubflowError};
use crate::stt::engine::ModelSize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub pipeline: PipelineConfig,
    pub downloader: DownloaderConfig,
}

/// Inference engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit backend override ("accelerated" or "cpu"). Probing is used when unset.
    pub backend: Option<String>,
    pub models_dir: PathBuf,
    pub language: String,
    pub threads: Option<usize>,
}

/// Run-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunk_duration_secs: f64,
    pub timeout_secs: u64,
    pub kill_grace_ms: u64,
    pub workspace_root: PathBuf,
    pub default_model_size: ModelSize,
}

/// External downloader configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloaderConfig {
    pub program: String,
    pub extra_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: None,
            models_dir: default_models_dir(),
            language: defaults::AUTO_LANGUAGE.to_string(),
            threads: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: defaults::CHUNK_DURATION_SECS,
            timeout_secs: defaults::TIMEOUT_SECS,
            kill_grace_ms: defaults::KILL_GRACE_MS,
            workspace_root: std::env::temp_dir().join("subflow"),
            default_model_size: ModelSize::Medium,
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            program: defaults::DOWNLOADER_PROGRAM.to_string(),
            extra_args: Vec::new(),
        }
    }
}

fn default_models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("subflow")
        .join("models")
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Missing fields use default values; invalid TOML is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(SubflowError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - SUBFLOW_BACKEND → engine.backend
    /// - SUBFLOW_MODELS_DIR → engine.models_dir
    /// - SUBFLOW_LANGUAGE → engine.language
    /// - SUBFLOW_TIMEOUT_SECS → pipeline.timeout_secs
    /// - SUBFLOW_CHUNK_SECS → pipeline.chunk_duration_secs
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(backend) = non_empty_env("SUBFLOW_BACKEND") {
            self.engine.backend = Some(backend.to_lowercase());
        }

        if let Some(dir) = non_empty_env("SUBFLOW_MODELS_DIR") {
            self.engine.models_dir = PathBuf::from(dir);
        }

        if let Some(language) = non_empty_env("SUBFLOW_LANGUAGE") {
            self.engine.language = language;
        }

        if let Some(timeout) = non_empty_env("SUBFLOW_TIMEOUT_SECS") {
            self.pipeline.timeout_secs =
                timeout
                    .parse()
                    .map_err(|_| SubflowError::ConfigInvalidValue {
                        key: "SUBFLOW_TIMEOUT_SECS".to_string(),
                        message: format!("expected whole seconds, got '{}'", timeout),
                    })?;
        }

        if let Some(chunk) = non_empty_env("SUBFLOW_CHUNK_SECS") {
            self.pipeline.chunk_duration_secs =
                chunk
                    .parse()
                    .map_err(|_| SubflowError::ConfigInvalidValue {
                        key: "SUBFLOW_CHUNK_SECS".to_string(),
                        message: format!("expected seconds, got '{}'", chunk),
                    })?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let chunk = self.pipeline.chunk_duration_secs;
        if !chunk.is_finite() || chunk <= 0.0 {
            return Err(SubflowError::ConfigInvalidValue {
                key: "pipeline.chunk_duration_secs".to_string(),
                message: "must be a positive number of seconds".to_string(),
            });
        }
        if self.pipeline.timeout_secs == 0 {
            return Err(SubflowError::ConfigInvalidValue {
                key: "pipeline.timeout_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/subflow/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("subflow")
            .join("config.toml")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
