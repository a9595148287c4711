//! subflow - SRT subtitles for online videos
//!
//! Downloads a video's audio, transcribes it chunk by chunk with a local
//! Whisper model in an isolated worker process, and streams progress and
//! partial subtitles while it runs.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod pipeline;
pub mod service;
pub mod stt;
pub mod sys;
pub mod workspace;

// Collaborator traits
pub use audio::fetch::{AudioFetcher, CommandExecutor, SystemCommandExecutor, YtDlpFetcher};
pub use audio::wav::{AudioAsset, ChunkSlicer, WavSlicer};
pub use pipeline::sink::{CollectorSink, EventSink, JsonLinesSink};
pub use stt::engine::{Backend, BackendKind, EngineAdapter, LoadedModel, ModelSize, RawSegment};

// Pipeline
pub use pipeline::runner::{Pipeline, RunSummary, RunWorkspace};
pub use pipeline::types::{Segment, TranscriptionRequest};

// Process isolation
pub use ipc::protocol::ProgressEvent;
pub use ipc::relay::{Relay, RelayHandle, RelayOptions, RelayStats, WorkerCommand};
pub use service::TranscriptionService;
pub use workspace::ResourceArena;

// Error handling
pub use error::{Result, SubflowError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
