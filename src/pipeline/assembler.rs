//! SRT assembly.

use crate::pipeline::types::{ChunkDescriptor, Segment};
use crate::stt::engine::RawSegment;

/// Format seconds as an SRT timestamp `HH:MM:SS,mmm`.
///
/// Milliseconds are truncated. Hours widen past two digits instead of
/// wrapping; negative and non-finite inputs format as zero.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).floor() as u64
    } else {
        0
    };
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render one SRT cue.
fn render_cue(segment: &Segment) -> String {
    format!(
        "{}\n{} --> {}\n{}\n",
        segment.ordinal,
        format_timestamp(segment.global_start),
        format_timestamp(segment.global_end),
        segment.text
    )
}

/// Accumulates segments in chunk order and numbers them.
#[derive(Debug, Default)]
pub struct SegmentAssembler {
    segments: Vec<Segment>,
}

impl SegmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift a raw segment from `chunk` into the full timeline and append it.
    ///
    /// Returns `None` (consuming no ordinal) when the trimmed text is empty.
    pub fn accept(&mut self, chunk: &ChunkDescriptor, raw: &RawSegment) -> Option<&Segment> {
        let text = raw.text.trim();
        if text.is_empty() {
            return None;
        }

        let (mut global_start, mut global_end) = chunk.to_global(raw);
        // Keep starts non-decreasing even if the engine's timestamps jitter
        if let Some(last) = self.segments.last() {
            global_start = global_start.max(last.global_start);
        }
        global_end = global_end.max(global_start);

        self.segments.push(Segment {
            ordinal: self.segments.len() + 1,
            global_start,
            global_end,
            text: text.to_string(),
        });
        self.segments.last()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Render every accepted segment as SRT text.
    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(render_cue)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
