//! Speech-to-text engine adapter and backends.

pub mod engine;
pub mod whisper;

pub use engine::{
    Backend, BackendKind, EngineAdapter, LoadedModel, MockBackend, MockReply, ModelSize,
    RawSegment,
};
pub use whisper::{WhisperBackend, WhisperConfig, default_backends};
