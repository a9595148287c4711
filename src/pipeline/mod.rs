//! Chunked transcription of one downloaded media file.
//!
//! The planner tiles the audio into chunk files, the runner transcribes them
//! in order with a single loaded model, and the assembler turns the results
//! into SRT text. Every step is reported through an [`EventSink`].

pub mod assembler;
pub mod planner;
pub mod progress;
pub mod runner;
pub mod sink;
pub mod types;

pub use assembler::{SegmentAssembler, format_timestamp};
pub use planner::{ChunkPlan, PlannedChunk};
pub use progress::ProgressTracker;
pub use runner::{Pipeline, RunSummary, RunWorkspace};
pub use sink::{ChannelSink, CollectorSink, EventSink, JsonLinesSink};
pub use types::{ChunkDescriptor, RunState, Segment, TranscriptionRequest};
