use crate::error::{Result, SubflowError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Whisper model sizes accepted in requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    #[default]
    Medium,
    Large,
}

impl ModelSize {
    pub const ALL: [ModelSize; 5] = [
        ModelSize::Tiny,
        ModelSize::Base,
        ModelSize::Small,
        ModelSize::Medium,
        ModelSize::Large,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelSize {
    type Err = SubflowError;

    fn from_str(s: &str) -> Result<Self> {
        ModelSize::ALL
            .into_iter()
            .find(|size| size.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SubflowError::InvalidRequest {
                message: format!(
                    "unknown model size '{}' (expected tiny, base, small, medium or large)",
                    s
                ),
            })
    }
}

/// One timed piece of text as the engine returns it, relative to the start
/// of the audio file it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    pub local_start: f64,
    pub local_end: f64,
    pub text: String,
}

impl RawSegment {
    pub fn new(local_start: f64, local_end: f64, text: impl Into<String>) -> Self {
        Self {
            local_start,
            local_end,
            text: text.into(),
        }
    }
}

/// Inference backends, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// GPU-backed inference.
    Accelerated,
    /// General-purpose CPU inference.
    Cpu,
}

impl BackendKind {
    pub const PREFERENCE: [BackendKind; 2] = [BackendKind::Accelerated, BackendKind::Cpu];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Accelerated => "accelerated",
            BackendKind::Cpu => "cpu",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        BackendKind::PREFERENCE
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inference backend that can load a model.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether this backend can run in the current environment.
    fn is_usable(&self) -> bool;

    /// Load a model. Slow; callers load once per run and reuse the handle.
    fn load(&self, model_size: ModelSize) -> Result<Box<dyn LoadedModel>>;
}

/// A loaded model.
///
/// `transcribe` takes `&mut self`: a model serves one chunk at a time.
pub trait LoadedModel: Send {
    fn transcribe(&mut self, audio: &Path) -> Result<Vec<RawSegment>>;

    fn model_name(&self) -> &str;
}

/// The backend chosen for a run.
#[derive(Clone)]
pub struct EngineAdapter {
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl EngineAdapter {
    /// Pick a backend.
    ///
    /// A known override wins. An unknown override is ignored with a warning.
    /// Otherwise the first usable candidate in preference order is chosen.
    pub fn select(override_name: Option<&str>, candidates: &[Arc<dyn Backend>]) -> Result<Self> {
        if let Some(name) = override_name.filter(|n| !n.trim().is_empty()) {
            match BackendKind::parse(name) {
                Some(kind) => {
                    if let Some(backend) = candidates.iter().find(|b| b.kind() == kind) {
                        tracing::info!(backend = %kind, "Using configured inference backend");
                        return Ok(Self {
                            backend: Arc::clone(backend),
                        });
                    }
                    tracing::warn!(backend = %kind, "Configured backend is not built in, probing");
                }
                None => {
                    tracing::warn!(backend = name, "Ignoring unknown backend override, probing");
                }
            }
        }

        for kind in BackendKind::PREFERENCE {
            if let Some(backend) = candidates
                .iter()
                .find(|b| b.kind() == kind && b.is_usable())
            {
                tracing::info!(backend = %kind, "Selected inference backend");
                return Ok(Self {
                    backend: Arc::clone(backend),
                });
            }
        }

        Err(SubflowError::NoBackendAvailable {
            probed: candidates
                .iter()
                .map(|b| b.kind().as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Usability of every candidate, for diagnostics.
    pub fn probe(candidates: &[Arc<dyn Backend>]) -> Vec<(BackendKind, bool)> {
        candidates
            .iter()
            .map(|b| (b.kind(), b.is_usable()))
            .collect()
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn load(&self, model_size: ModelSize) -> Result<Box<dyn LoadedModel>> {
        self.backend.load(model_size)
    }
}

/// Scripted reply for one `MockModel::transcribe` call.
#[derive(Debug, Clone)]
pub enum MockReply {
    Segments(Vec<RawSegment>),
    Fail(String),
}

/// Mock backend for testing.
///
/// Replies are consumed in call order; once exhausted every call returns a
/// single one-second "mock transcription" segment.
#[derive(Clone)]
pub struct MockBackend {
    kind: BackendKind,
    usable: bool,
    fail_load: bool,
    replies: Arc<Mutex<Vec<MockReply>>>,
    loads: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            usable: true,
            fail_load: false,
            replies: Arc::new(Mutex::new(Vec::new())),
            loads: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn unusable(mut self) -> Self {
        self.usable = false;
        self
    }

    pub fn with_load_failure(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn with_replies(self, replies: Vec<MockReply>) -> Self {
        if let Ok(mut queue) = self.replies.lock() {
            *queue = replies;
            queue.reverse();
        }
        self
    }

    /// Number of times a model was loaded.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Audio paths passed to `transcribe`, in call order.
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_usable(&self) -> bool {
        self.usable
    }

    fn load(&self, model_size: ModelSize) -> Result<Box<dyn LoadedModel>> {
        if self.fail_load {
            return Err(SubflowError::ModelLoad {
                message: "mock load failure".to_string(),
            });
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockModel {
            name: format!("mock-{}", model_size),
            replies: Arc::clone(&self.replies),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct MockModel {
    name: String,
    replies: Arc<Mutex<Vec<MockReply>>>,
    calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl LoadedModel for MockModel {
    fn transcribe(&mut self, audio: &Path) -> Result<Vec<RawSegment>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(audio.to_path_buf());
        }
        let reply = self.replies.lock().ok().and_then(|mut q| q.pop());
        match reply {
            Some(MockReply::Segments(segments)) => Ok(segments),
            Some(MockReply::Fail(message)) => {
                Err(SubflowError::TranscriptionInferenceFailed { message })
            }
            None => Ok(vec![RawSegment::new(0.0, 1.0, "mock transcription")]),
        }
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
