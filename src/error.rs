//! Error types for subflow.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubflowError {
    // Request errors
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Source acquisition
    #[error("{message}")]
    Download { message: String },

    // Engine errors
    #[error("No inference backend available (probed: {probed})")]
    NoBackendAvailable { probed: String },

    #[error("Failed to load model: {message}")]
    ModelLoad { message: String },

    #[error("Transcription inference failed: {message}")]
    TranscriptionInferenceFailed { message: String },

    // Planning and per-chunk errors
    #[error("Planning failed: {message}")]
    Planning { message: String },

    #[error("Chunk {index} failed: {message}")]
    Chunk { index: usize, message: String },

    #[error("No transcription content generated")]
    EmptyTranscription,

    // Worker / relay errors
    #[error("Transcription timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Transcription worker failed: {message}")]
    Worker { message: String },

    #[error("Transcription cancelled")]
    Cancelled,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SubflowError {
    /// Whether this error aborts a whole run.
    ///
    /// Only `Chunk` errors are reported and then skipped over.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SubflowError::Chunk { .. })
    }
}

pub type Result<T> = std::result::Result<T, SubflowError>;
