//! Splits a downloaded audio file into fixed-length chunk files.
//!
//! Chunk `i` covers `[i * len, min((i + 1) * len, duration))`, so the chunks
//! tile the whole file. A chunk whose slice cannot be written is skipped and
//! remembered; only a plan with no usable chunk at all is an error.

use crate::audio::wav::{AudioAsset, ChunkSlicer};
use crate::defaults::NO_PROCESSABLE_AUDIO;
use crate::error::{Result, SubflowError};
use crate::pipeline::types::ChunkDescriptor;
use crate::workspace::ResourceArena;

/// One planned time range.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedChunk {
    Ready(ChunkDescriptor),
    Skipped {
        index: usize,
        start_offset: f64,
        end_offset: f64,
        reason: String,
    },
}

impl PlannedChunk {
    pub fn index(&self) -> usize {
        match self {
            PlannedChunk::Ready(chunk) => chunk.index,
            PlannedChunk::Skipped { index, .. } => *index,
        }
    }

    pub fn range(&self) -> (f64, f64) {
        match self {
            PlannedChunk::Ready(chunk) => (chunk.start_offset, chunk.end_offset),
            PlannedChunk::Skipped {
                start_offset,
                end_offset,
                ..
            } => (*start_offset, *end_offset),
        }
    }
}

/// All planned chunks in index order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub chunks: Vec<PlannedChunk>,
}

impl ChunkPlan {
    pub fn total(&self) -> usize {
        self.chunks.len()
    }

    pub fn ready(&self) -> impl Iterator<Item = &ChunkDescriptor> {
        self.chunks.iter().filter_map(|c| match c {
            PlannedChunk::Ready(chunk) => Some(chunk),
            PlannedChunk::Skipped { .. } => None,
        })
    }

    pub fn ready_count(&self) -> usize {
        self.ready().count()
    }
}

/// Time ranges for a duration, without touching the filesystem.
pub fn chunk_ranges(duration: f64, chunk_duration: f64) -> Result<Vec<(f64, f64)>> {
    if !chunk_duration.is_finite() || chunk_duration <= 0.0 {
        return Err(SubflowError::InvalidRequest {
            message: format!("chunk duration must be positive, got {}", chunk_duration),
        });
    }
    if !duration.is_finite() || duration <= 0.0 {
        return Err(SubflowError::Planning {
            message: format!("audio duration must be positive, got {}", duration),
        });
    }

    let count = (duration / chunk_duration).ceil() as usize;
    Ok((0..count)
        .map(|i| {
            let start = i as f64 * chunk_duration;
            let end = ((i + 1) as f64 * chunk_duration).min(duration);
            (start, end)
        })
        .filter(|(start, end)| end > start)
        .collect())
}

/// Materialize every chunk of `asset` inside the arena.
pub fn plan(
    asset: &AudioAsset,
    chunk_duration: f64,
    slicer: &dyn ChunkSlicer,
    arena: &ResourceArena,
) -> Result<ChunkPlan> {
    let ranges = chunk_ranges(asset.duration_seconds, chunk_duration)?;
    tracing::info!(
        duration_secs = asset.duration_seconds,
        chunk_secs = chunk_duration,
        chunks = ranges.len(),
        "Planning chunks"
    );

    let mut chunks = Vec::with_capacity(ranges.len());
    for (index, (start, end)) in ranges.into_iter().enumerate() {
        let path = arena.path_for(&format!("chunk_{:04}.wav", index))?;
        match slicer.slice(&asset.path, start, end, &path) {
            Ok(()) => chunks.push(PlannedChunk::Ready(ChunkDescriptor {
                index,
                path,
                start_offset: start,
                end_offset: end,
            })),
            Err(e) => {
                tracing::warn!(index, start, end, error = %e, "Skipping chunk that could not be sliced");
                chunks.push(PlannedChunk::Skipped {
                    index,
                    start_offset: start,
                    end_offset: end,
                    reason: e.to_string(),
                });
            }
        }
    }

    let plan = ChunkPlan { chunks };
    if plan.ready_count() == 0 {
        return Err(SubflowError::Planning {
            message: NO_PROCESSABLE_AUDIO.to_string(),
        });
    }
    Ok(plan)
}
