//! The chunk transcription loop.
//!
//! `Pipeline::run` drives one request through
//! `Idle → Downloading → Planning → LoadingModel → ProcessingChunks →
//! Finalizing → Completed`, falling to `Failed` on any run-fatal error.
//! Chunks are transcribed strictly one after another with a single loaded
//! model; a failing chunk is reported and skipped.

use crate::audio::fetch::{AudioFetcher, YtDlpFetcher};
use crate::audio::wav::{ChunkSlicer, WavSlicer};
use crate::config::Config;
use crate::defaults::{
    PROGRESS_DONE, PROGRESS_DOWNLOAD, PROGRESS_FINALIZING, PROGRESS_LOADING_MODEL,
    PROGRESS_PLANNING,
};
use crate::error::{Result, SubflowError};
use crate::ipc::protocol::ProgressEvent;
use crate::pipeline::assembler::SegmentAssembler;
use crate::pipeline::planner::{self, PlannedChunk};
use crate::pipeline::progress::{ProgressTracker, chunk_percent};
use crate::pipeline::sink::EventSink;
use crate::pipeline::types::{RunState, TranscriptionRequest};
use crate::stt::engine::{Backend, EngineAdapter, LoadedModel};
use crate::stt::whisper::default_backends;
use crate::workspace::ResourceArena;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a run keeps its scratch files.
#[derive(Debug, Clone)]
pub enum RunWorkspace {
    /// Create and own `<root>/run-<uuid>`.
    Fresh(PathBuf),
    /// Use a directory owned by a supervising process.
    Adopt(PathBuf),
}

impl RunWorkspace {
    fn open(&self) -> Result<ResourceArena> {
        match self {
            RunWorkspace::Fresh(root) => {
                ResourceArena::acquire(root, &uuid::Uuid::new_v4().to_string())
            }
            RunWorkspace::Adopt(dir) => ResourceArena::adopt(dir),
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub final_text: String,
    pub total_segments: usize,
    pub total_chunks: usize,
    pub failed_chunks: Vec<usize>,
}

/// Transcription pipeline with its collaborators.
#[derive(Clone)]
pub struct Pipeline {
    backends: Vec<Arc<dyn Backend>>,
    backend_override: Option<String>,
    fetcher: Arc<dyn AudioFetcher>,
    slicer: Arc<dyn ChunkSlicer>,
}

impl Pipeline {
    pub fn new(
        backends: Vec<Arc<dyn Backend>>,
        fetcher: Arc<dyn AudioFetcher>,
        slicer: Arc<dyn ChunkSlicer>,
    ) -> Self {
        Self {
            backends,
            backend_override: None,
            fetcher,
            slicer,
        }
    }

    /// Production pipeline: Whisper backends, yt-dlp and the WAV slicer.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            default_backends(&config.engine),
            Arc::new(YtDlpFetcher::system(config.downloader.clone())),
            Arc::new(WavSlicer),
        )
        .with_backend_override(config.engine.backend.clone())
    }

    pub fn with_backend_override(mut self, backend: Option<String>) -> Self {
        self.backend_override = backend;
        self
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    /// Select the backend without running anything.
    pub fn select_backend(&self) -> Result<EngineAdapter> {
        EngineAdapter::select(self.backend_override.as_deref(), &self.backends)
    }

    /// Run one request to completion, reporting every step to `sink`.
    ///
    /// Exactly one terminal event (`completed` or `error`) is emitted unless
    /// the sink itself has gone away.
    pub fn run(
        &self,
        request: &TranscriptionRequest,
        workspace: &RunWorkspace,
        sink: &mut dyn EventSink,
    ) -> Result<RunSummary> {
        let mut run = Run {
            state: RunState::Idle,
            progress: ProgressTracker::new(),
            sink,
        };

        match self.execute(request, workspace, &mut run) {
            Ok(summary) => Ok(summary),
            Err(e) => {
                run.transition(RunState::Failed);
                tracing::error!(url = %request.source_url, error = %e, "Transcription failed");
                if !matches!(e, SubflowError::Cancelled)
                    && run
                        .emit(ProgressEvent::Error {
                            message: e.to_string(),
                        })
                        .is_err()
                {
                    tracing::debug!("Error event not delivered");
                }
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        request: &TranscriptionRequest,
        workspace: &RunWorkspace,
        run: &mut Run<'_>,
    ) -> Result<RunSummary> {
        request.validate()?;

        // Probe before any download so a misconfigured host fails fast
        let adapter = self.select_backend()?;
        let arena = workspace.open()?;

        run.transition(RunState::Downloading);
        run.status("Downloading audio...")?;
        run.progress(PROGRESS_DOWNLOAD, "Downloading audio")?;
        let asset = self.fetcher.fetch(&request.source_url, &arena)?;

        run.transition(RunState::Planning);
        run.progress(
            PROGRESS_PLANNING,
            &format!("Splitting {:.1}s of audio into chunks", asset.duration_seconds),
        )?;
        let plan = planner::plan(&asset, request.chunk_duration, self.slicer.as_ref(), &arena)?;

        run.transition(RunState::LoadingModel);
        run.status(&format!(
            "Loading {} model ({} backend)...",
            request.model_size,
            adapter.kind()
        ))?;
        run.progress(PROGRESS_LOADING_MODEL, "Loading model")?;
        let mut model = adapter.load(request.model_size)?;
        tracing::info!(model = model.model_name(), "Model loaded");

        run.transition(RunState::ProcessingChunks);
        let total = plan.total();
        let mut assembler = SegmentAssembler::new();
        let mut failed_chunks = Vec::new();
        for planned in &plan.chunks {
            if !process_chunk(planned, total, model.as_mut(), &mut assembler, run)? {
                failed_chunks.push(planned.index());
            }
        }
        // Release the engine before anything else
        drop(model);

        run.transition(RunState::Finalizing);
        run.progress(PROGRESS_FINALIZING, "Finalizing subtitles")?;
        let final_text = assembler.render();
        if assembler.is_empty() {
            tracing::warn!(url = %request.source_url, "Run produced no segments");
        }
        arena.release();

        run.progress(PROGRESS_DONE, "Transcription complete")?;
        run.emit(ProgressEvent::Completed {
            final_text: final_text.clone(),
            total_segments: assembler.len(),
        })?;
        run.transition(RunState::Completed);
        tracing::info!(
            segments = assembler.len(),
            chunks = total,
            failed = failed_chunks.len(),
            "Transcription complete"
        );

        Ok(RunSummary {
            final_text,
            total_segments: assembler.len(),
            total_chunks: total,
            failed_chunks,
        })
    }
}

/// Transcribe one planned chunk. Returns `false` if the chunk failed.
///
/// Only sink failures are returned as errors.
fn process_chunk(
    planned: &PlannedChunk,
    total: usize,
    model: &mut dyn LoadedModel,
    assembler: &mut SegmentAssembler,
    run: &mut Run<'_>,
) -> Result<bool> {
    let index = planned.index();
    let (start, end) = planned.range();
    let percent = run.progress.advance(chunk_percent(index, total));
    run.emit(ProgressEvent::ProcessingChunk {
        index,
        total,
        start,
        end,
        percent,
    })?;

    let chunk = match planned {
        PlannedChunk::Ready(chunk) => chunk,
        PlannedChunk::Skipped { reason, .. } => {
            run.emit(ProgressEvent::ChunkError {
                index,
                message: reason.clone(),
            })?;
            return Ok(false);
        }
    };

    let raw_segments = match model.transcribe(&chunk.path) {
        Ok(segments) => segments,
        Err(e) => {
            let error = SubflowError::Chunk {
                index,
                message: e.to_string(),
            };
            tracing::warn!(index, error = %error, "Chunk transcription failed");
            run.emit(ProgressEvent::ChunkError {
                index,
                message: e.to_string(),
            })?;
            return Ok(false);
        }
    };

    for raw in &raw_segments {
        if let Some(segment) = assembler.accept(chunk, raw) {
            let segment = segment.clone();
            run.emit(ProgressEvent::SegmentCompleted {
                segment,
                partial_text: assembler.render(),
            })?;
        }
    }

    run.emit(ProgressEvent::ChunkCompleted { index })?;
    tracing::debug!(index, segments = raw_segments.len(), "Chunk done");
    Ok(true)
}

/// Per-run mutable state.
struct Run<'a> {
    state: RunState,
    progress: ProgressTracker,
    sink: &'a mut dyn EventSink,
}

impl Run<'_> {
    fn transition(&mut self, next: RunState) {
        if !self.state.can_advance_to(next) {
            tracing::warn!(from = %self.state, to = %next, "Ignoring invalid state transition");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "Run state");
        self.state = next;
    }

    fn emit(&mut self, event: ProgressEvent) -> Result<()> {
        self.sink.emit(event).map_err(|e| {
            tracing::warn!(sink = self.sink.name(), error = %e, "Event consumer gone");
            SubflowError::Cancelled
        })
    }

    fn status(&mut self, message: &str) -> Result<()> {
        self.emit(ProgressEvent::Status {
            message: message.to_string(),
        })
    }

    fn progress(&mut self, percent: f32, message: &str) -> Result<()> {
        let percent = self.progress.advance(percent);
        self.emit(ProgressEvent::Progress {
            percent,
            message: message.to_string(),
        })
    }
}
