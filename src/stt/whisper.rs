//! Whisper inference backends.
//!
//! Both backends wrap whisper-rs; they differ only in whether the context is
//! created on the GPU.
//!
//! # Feature Gate
//!
//! Real inference requires the `whisper` feature and cmake. Without it the
//! backends exist but report themselves unusable, so backend selection fails
//! with `NoBackendAvailable` before any download starts.

use crate::config::EngineConfig;
use crate::defaults;
use crate::error::{Result, SubflowError};
use crate::stt::engine::{Backend, BackendKind, LoadedModel, ModelSize};
#[cfg(feature = "whisper")]
use crate::stt::engine::RawSegment;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "whisper")]
use std::sync::Once;
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration shared by both Whisper backends.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Directory holding `ggml-<size>.bin` model files
    pub models_dir: PathBuf,
    /// Language code (e.g., "en", "es") or "auto"
    pub language: String,
    /// Number of threads for inference (None = whisper.cpp default)
    pub threads: Option<usize>,
}

impl From<&EngineConfig> for WhisperConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            models_dir: config.models_dir.clone(),
            language: config.language.clone(),
            threads: config.threads,
        }
    }
}

impl WhisperConfig {
    /// Path of the model file for a size.
    pub fn model_path(&self, size: ModelSize) -> PathBuf {
        self.models_dir.join(format!("ggml-{}.bin", size))
    }
}

/// Whisper backend, GPU or CPU flavoured.
#[derive(Debug, Clone)]
pub struct WhisperBackend {
    kind: BackendKind,
    config: WhisperConfig,
}

impl WhisperBackend {
    pub fn accelerated(config: WhisperConfig) -> Self {
        Self {
            kind: BackendKind::Accelerated,
            config,
        }
    }

    pub fn cpu(config: WhisperConfig) -> Self {
        Self {
            kind: BackendKind::Cpu,
            config,
        }
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    fn check_model(&self, size: ModelSize) -> Result<PathBuf> {
        let path = self.config.model_path(size);
        if !path.exists() {
            return Err(SubflowError::ModelLoad {
                message: format!(
                    "model file {} not found (download ggml-{}.bin into {})",
                    path.display(),
                    size,
                    self.config.models_dir.display()
                ),
            });
        }
        Ok(path)
    }
}

/// The candidate backends in preference order.
pub fn default_backends(config: &EngineConfig) -> Vec<Arc<dyn Backend>> {
    let whisper = WhisperConfig::from(config);
    vec![
        Arc::new(WhisperBackend::accelerated(whisper.clone())),
        Arc::new(WhisperBackend::cpu(whisper)),
    ]
}

impl Backend for WhisperBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_usable(&self) -> bool {
        if !cfg!(feature = "whisper") {
            return false;
        }
        match self.kind {
            BackendKind::Accelerated => defaults::gpu_backend().is_some(),
            BackendKind::Cpu => true,
        }
    }

    #[cfg(feature = "whisper")]
    fn load(&self, model_size: ModelSize) -> Result<Box<dyn LoadedModel>> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        let model_path = self.check_model(model_size)?;
        let path_str = model_path.to_str().ok_or_else(|| SubflowError::ModelLoad {
            message: "Invalid UTF-8 in model path".to_string(),
        })?;

        let mut context_params = WhisperContextParameters::default();
        context_params.use_gpu(self.kind == BackendKind::Accelerated);
        context_params.flash_attn(true);

        tracing::info!(
            backend = %self.kind,
            model = %model_path.display(),
            gpu = defaults::gpu_backend().unwrap_or("none"),
            "Loading Whisper model"
        );
        let context = WhisperContext::new_with_params(path_str, context_params).map_err(|e| {
            SubflowError::ModelLoad {
                message: format!("Failed to load Whisper model: {}", e),
            }
        })?;

        Ok(Box::new(WhisperModel {
            context,
            language: self.config.language.clone(),
            threads: self.config.threads,
            name: format!("whisper-{}", model_size),
        }))
    }

    #[cfg(not(feature = "whisper"))]
    fn load(&self, model_size: ModelSize) -> Result<Box<dyn LoadedModel>> {
        self.check_model(model_size)?;
        Err(SubflowError::ModelLoad {
            message: concat!(
                "Whisper feature not enabled. This binary was built without speech recognition.\n",
                "To fix: cargo build --release (whisper is enabled by default)"
            )
            .to_string(),
        })
    }
}

/// A loaded Whisper context.
#[cfg(feature = "whisper")]
pub struct WhisperModel {
    context: WhisperContext,
    language: String,
    threads: Option<usize>,
    name: String,
}

#[cfg(feature = "whisper")]
impl LoadedModel for WhisperModel {
    fn transcribe(&mut self, audio: &Path) -> Result<Vec<RawSegment>> {
        let samples = crate::audio::wav::read_mono_f32(audio)?;

        let mut state =
            self.context
                .create_state()
                .map_err(|e| SubflowError::TranscriptionInferenceFailed {
                    message: format!("Failed to create Whisper state: {}", e),
                })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if self.language == defaults::AUTO_LANGUAGE {
            params.set_language(None);
        } else {
            params.set_language(Some(&self.language));
        }
        if let Some(threads) = self.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &samples)
            .map_err(|e| SubflowError::TranscriptionInferenceFailed {
                message: format!("Whisper inference failed: {}", e),
            })?;

        // Whisper timestamps are in centiseconds
        let segments = state
            .as_iter()
            .map(|segment| RawSegment {
                local_start: segment.start_timestamp() as f64 / 100.0,
                local_end: segment.end_timestamp() as f64 / 100.0,
                text: segment.to_string(),
            })
            .collect();
        Ok(segments)
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Check whether a model file is present without loading it.
pub fn model_installed(models_dir: &Path, size: ModelSize) -> bool {
    models_dir.join(format!("ggml-{}.bin", size)).exists()
}
