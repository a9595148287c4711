//! Data types shared by the pipeline stages.

use crate::defaults;
use crate::error::{Result, SubflowError};
use crate::stt::engine::{ModelSize, RawSegment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One transcription request. Immutable for the life of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    pub source_url: String,
    pub model_size: ModelSize,
    pub chunk_duration: f64,
}

impl TranscriptionRequest {
    pub fn new(source_url: impl Into<String>, model_size: ModelSize) -> Self {
        Self {
            source_url: source_url.into(),
            model_size,
            chunk_duration: defaults::CHUNK_DURATION_SECS,
        }
    }

    pub fn with_chunk_duration(mut self, seconds: f64) -> Self {
        self.chunk_duration = seconds;
        self
    }

    /// Reject requests no run could serve.
    pub fn validate(&self) -> Result<()> {
        if self.source_url.trim().is_empty() {
            return Err(SubflowError::InvalidRequest {
                message: "URL is required".to_string(),
            });
        }
        if !self.chunk_duration.is_finite() || self.chunk_duration <= 0.0 {
            return Err(SubflowError::InvalidRequest {
                message: format!(
                    "chunk duration must be a positive number of seconds, got {}",
                    self.chunk_duration
                ),
            });
        }
        Ok(())
    }
}

/// A materialized slice of the source audio.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDescriptor {
    /// 0-based, contiguous across the plan
    pub index: usize,
    pub path: PathBuf,
    pub start_offset: f64,
    pub end_offset: f64,
}

impl ChunkDescriptor {
    pub fn duration(&self) -> f64 {
        self.end_offset - self.start_offset
    }

    /// Shift an engine segment into the full timeline.
    pub fn to_global(&self, raw: &RawSegment) -> (f64, f64) {
        (
            self.start_offset + raw.local_start.max(0.0),
            self.start_offset + raw.local_end.max(0.0),
        )
    }
}

/// A subtitle line on the full timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// 1-based, contiguous across the run
    pub ordinal: usize,
    pub global_start: f64,
    pub global_end: f64,
    pub text: String,
}

/// Run lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Idle,
    Downloading,
    Planning,
    LoadingModel,
    ProcessingChunks,
    Finalizing,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    /// Any non-terminal state may fail; otherwise only the next state is allowed.
    pub fn can_advance_to(self, next: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            RunState::Failed => true,
            RunState::Completed => self == RunState::Finalizing,
            _ => next as u8 == self as u8 + 1,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Downloading => "downloading",
            RunState::Planning => "planning",
            RunState::LoadingModel => "loading_model",
            RunState::ProcessingChunks => "processing_chunks",
            RunState::Finalizing => "finalizing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_to_thirty_second_chunks() {
        let request = TranscriptionRequest::new("https://example.com/v", ModelSize::Tiny);
        assert_eq!(request.chunk_duration, 30.0);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_requires_url() {
        let request = TranscriptionRequest::new("   ", ModelSize::Tiny);
        match request.validate() {
            Err(SubflowError::InvalidRequest { message }) => assert_eq!(message, "URL is required"),
            other => panic!("Expected InvalidRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_request_rejects_bad_chunk_duration() {
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let request = TranscriptionRequest::new("u", ModelSize::Base).with_chunk_duration(bad);
            assert!(request.validate().is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn test_chunk_to_global_shifts_by_start_offset() {
        let chunk = ChunkDescriptor {
            index: 2,
            path: PathBuf::from("chunk_0002.wav"),
            start_offset: 60.0,
            end_offset: 65.0,
        };
        let raw = RawSegment::new(1.5, 3.25, "hello");
        assert_eq!(chunk.to_global(&raw), (61.5, 63.25));
        assert_eq!(chunk.duration(), 5.0);
    }

    #[test]
    fn test_run_state_moves_forward_only() {
        use RunState::*;
        assert!(Idle.can_advance_to(Downloading));
        assert!(Downloading.can_advance_to(Planning));
        assert!(Planning.can_advance_to(LoadingModel));
        assert!(LoadingModel.can_advance_to(ProcessingChunks));
        assert!(ProcessingChunks.can_advance_to(Finalizing));
        assert!(Finalizing.can_advance_to(Completed));

        assert!(!Planning.can_advance_to(Downloading));
        assert!(!Idle.can_advance_to(Planning));
        assert!(!ProcessingChunks.can_advance_to(Completed));
        assert!(!Completed.can_advance_to(Failed));
        assert!(Downloading.can_advance_to(Failed));
    }

    #[test]
    fn test_segment_serializes_field_names() {
        let segment = Segment {
            ordinal: 1,
            global_start: 0.5,
            global_end: 2.0,
            text: "hi".to_string(),
        };
        let json = serde_json::to_string(&segment).unwrap();
        assert_eq!(
            json,
            r#"{"ordinal":1,"global_start":0.5,"global_end":2.0,"text":"hi"}"#
        );
    }
}
