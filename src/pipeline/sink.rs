//! Destinations for progress events.

use crate::error::{Result, SubflowError};
use crate::ipc::protocol::ProgressEvent;
use std::io::Write;
use tokio::sync::mpsc;

/// Receives every event of a run, in order.
///
/// An error means the consumer is gone; the run stops as cancelled.
pub trait EventSink: Send {
    fn emit(&mut self, event: ProgressEvent) -> Result<()>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Keeps events in memory. Used by tests and synchronous callers.
#[derive(Debug, Default)]
pub struct CollectorSink {
    events: Vec<ProgressEvent>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ProgressEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<ProgressEvent> {
        self.events
    }
}

impl EventSink for CollectorSink {
    fn emit(&mut self, event: ProgressEvent) -> Result<()> {
        self.events.push(event);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Writes one JSON object per line and flushes after each, so the reader sees
/// events as soon as they happen.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: ProgressEvent) -> Result<()> {
        let json = event.to_json().map_err(|e| SubflowError::Protocol {
            message: format!("Failed to serialize {} event: {}", event.kind(), e),
        })?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}

/// Forwards events into a tokio channel from a blocking thread.
///
/// Must not be used from inside an async task: `blocking_send` parks the thread.
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: ProgressEvent) -> Result<()> {
        self.tx
            .blocking_send(event)
            .map_err(|_| SubflowError::Cancelled)
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}
