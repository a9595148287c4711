//! JSON-lines event protocol between the transcription worker and the relay.
//!
//! Each event is one self-contained JSON object on its own line, tagged by
//! `"type"`. A consumer that has seen only a prefix of the stream can parse
//! every complete line it received.

use crate::pipeline::types::Segment;
use serde::{Deserialize, Serialize};

/// Progress events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Human-readable phase change
    Status { message: String },
    /// Overall progress, non-decreasing within a run
    Progress { percent: f32, message: String },
    /// A chunk is about to be transcribed
    ProcessingChunk {
        index: usize,
        total: usize,
        start: f64,
        end: f64,
        percent: f32,
    },
    /// A segment was accepted; `partial_text` is the SRT rendered so far
    SegmentCompleted {
        segment: Segment,
        partial_text: String,
    },
    ChunkCompleted { index: usize },
    /// A chunk failed; the run continues with the next one
    ChunkError { index: usize, message: String },
    /// Terminal: final subtitle text
    Completed {
        final_text: String,
        total_segments: usize,
    },
    /// Terminal: the run failed
    Error { message: String },
}

impl ProgressEvent {
    /// Serialize event to a single JSON line (without the newline).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from a JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. } | ProgressEvent::Error { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Status { .. } => "status",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::ProcessingChunk { .. } => "processing_chunk",
            ProgressEvent::SegmentCompleted { .. } => "segment_completed",
            ProgressEvent::ChunkCompleted { .. } => "chunk_completed",
            ProgressEvent::ChunkError { .. } => "chunk_error",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

/// Parse one line of worker output.
///
/// Returns `None` for blank lines and anything that is not a protocol event;
/// such lines are diagnostic noise, not errors.
pub fn parse_line(line: &str) -> Option<ProgressEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return None;
    }
    ProgressEvent::from_json(trimmed).ok()
}
