//! Entry points for callers: streaming and synchronous transcription.

use crate::config::Config;
use crate::defaults::{DOWNLOAD_ERROR_MESSAGE, EVENT_CHANNEL_CAPACITY};
use crate::error::{Result, SubflowError};
use crate::ipc::protocol::ProgressEvent;
use crate::ipc::relay::{Relay, RelayHandle, RelayOptions, WorkerCommand};
use crate::ipc::worker::WorkerArgs;
use crate::pipeline::runner::{Pipeline, RunSummary, RunWorkspace};
use crate::pipeline::sink::{ChannelSink, EventSink};
use crate::pipeline::types::TranscriptionRequest;
use crate::stt::engine::{BackendKind, EngineAdapter};
use crate::workspace::ResourceArena;
use std::ffi::OsString;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Runs transcription requests, each in its own worker process.
pub struct TranscriptionService {
    config: Config,
    pipeline: Pipeline,
    worker_program: OsString,
}

impl TranscriptionService {
    /// Service with the production pipeline, re-executing the current binary
    /// as the worker.
    pub fn new(config: Config) -> Result<Self> {
        let pipeline = Pipeline::from_config(&config);
        let worker_program = std::env::current_exe()?.into_os_string();
        Ok(Self::with_pipeline(config, pipeline, worker_program))
    }

    /// Service with an explicit pipeline and worker executable.
    pub fn with_pipeline(
        config: Config,
        pipeline: Pipeline,
        worker_program: impl Into<OsString>,
    ) -> Self {
        Self {
            config,
            pipeline,
            worker_program: worker_program.into(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Select the inference backend the workers will use.
    pub fn probe(&self) -> Result<EngineAdapter> {
        self.pipeline.select_backend()
    }

    /// Usability of every known backend, in preference order.
    pub fn backend_report(&self) -> Vec<(BackendKind, bool)> {
        EngineAdapter::probe(self.pipeline.backends())
    }

    /// Start a request in a new worker and return its event stream.
    ///
    /// Fails without spawning anything if the request is invalid or no
    /// backend is usable. Must be called within a tokio runtime.
    pub fn stream(&self, request: &TranscriptionRequest) -> Result<RelayHandle> {
        request.validate()?;
        let adapter = self.probe()?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let arena = ResourceArena::acquire(&self.config.pipeline.workspace_root, &request_id)?;
        let args = WorkerArgs::new(request, arena.dir().to_path_buf(), &self.config);
        let command = WorkerCommand::worker(self.worker_program.clone(), &args);

        tracing::info!(
            request_id,
            url = %request.source_url,
            model = %request.model_size,
            backend = %adapter.kind(),
            "Starting transcription worker"
        );
        Relay::spawn(&command, arena, RelayOptions::from_config(&self.config))
    }

    /// Run a request to completion and return the subtitle text.
    pub async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String> {
        let mut handle = self.stream(request)?;
        let mut outcome = None;
        while let Some(event) = handle.next().await {
            match event {
                ProgressEvent::Completed { final_text, .. } => outcome = Some(Ok(final_text)),
                ProgressEvent::Error { message } => outcome = Some(Err(message)),
                other => tracing::debug!(kind = other.kind(), "Worker event"),
            }
        }
        let stats = handle.finish().await;

        match outcome {
            Some(Ok(text)) if text.trim().is_empty() => Err(SubflowError::EmptyTranscription),
            Some(Ok(text)) => Ok(text),
            Some(Err(_)) if stats.timed_out => Err(SubflowError::Timeout {
                secs: self.config.pipeline.timeout_secs,
            }),
            Some(Err(message)) if message == DOWNLOAD_ERROR_MESSAGE => {
                Err(SubflowError::Download { message })
            }
            Some(Err(message)) => Err(SubflowError::Other(message)),
            None => Err(SubflowError::Cancelled),
        }
    }

    /// Run a request on the calling thread, without process isolation.
    ///
    /// The engine's memory stays with this process afterwards.
    pub fn transcribe_in_process(
        &self,
        request: &TranscriptionRequest,
        sink: &mut dyn EventSink,
    ) -> Result<RunSummary> {
        let workspace = RunWorkspace::Fresh(self.config.pipeline.workspace_root.clone());
        self.pipeline.run(request, &workspace, sink)
    }

    /// Run a request on a blocking thread of this process and stream its events.
    ///
    /// Closing or dropping the receiver cancels the run at its next event.
    /// Must be called within a tokio runtime.
    pub fn stream_in_process(
        &self,
        request: &TranscriptionRequest,
    ) -> (mpsc::Receiver<ProgressEvent>, JoinHandle<Result<RunSummary>>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pipeline = self.pipeline.clone();
        let root = self.config.pipeline.workspace_root.clone();
        let request = request.clone();

        let task = tokio::task::spawn_blocking(move || {
            let mut sink = ChannelSink::new(tx);
            pipeline.run(&request, &RunWorkspace::Fresh(root), &mut sink)
        });
        (rx, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::WavSlicer;
    use crate::audio::fetch::YtDlpFetcher;
    use crate::stt::engine::{MockBackend, ModelSize};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn service(root: &TempDir, backend: MockBackend, worker: &str) -> TranscriptionService {
        let mut config = Config::default();
        config.pipeline.workspace_root = root.path().to_path_buf();
        let pipeline = Pipeline::new(
            vec![Arc::new(backend)],
            Arc::new(YtDlpFetcher::system(config.downloader.clone())),
            Arc::new(WavSlicer),
        );
        TranscriptionService::with_pipeline(config, pipeline, worker)
    }

    fn request() -> TranscriptionRequest {
        TranscriptionRequest::new("https://example.com/v", ModelSize::Base)
    }

    #[tokio::test]
    async fn stream_without_backend_spawns_nothing() {
        let root = TempDir::new().unwrap();
        let svc = service(
            &root,
            MockBackend::new(BackendKind::Cpu).unusable(),
            "/nonexistent/worker",
        );
        let result = svc.stream(&request());
        assert!(matches!(
            result,
            Err(SubflowError::NoBackendAvailable { .. })
        ));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn transcribe_rejects_empty_url() {
        let root = TempDir::new().unwrap();
        let svc = service(&root, MockBackend::new(BackendKind::Cpu), "/bin/true");
        let request = TranscriptionRequest::new("  ", ModelSize::Base);
        assert!(matches!(
            svc.transcribe(&request).await,
            Err(SubflowError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn transcribe_reports_worker_without_result() {
        let root = TempDir::new().unwrap();
        // `true` ignores its arguments and exits without printing anything
        let svc = service(&root, MockBackend::new(BackendKind::Cpu), "true");
        let result = svc.transcribe(&request()).await;
        match result {
            Err(SubflowError::Other(message)) => {
                assert!(message.contains("exited without a result"), "{}", message)
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn in_process_stream_ends_with_the_run_error() {
        let root = TempDir::new().unwrap();
        let svc = service(
            &root,
            MockBackend::new(BackendKind::Cpu).unusable(),
            "/nonexistent/worker",
        );

        let (mut events, task) = svc.stream_in_process(&request());
        let mut received = Vec::new();
        while let Some(event) = events.recv().await {
            received.push(event);
        }

        assert!(matches!(
            task.await.unwrap(),
            Err(SubflowError::NoBackendAvailable { .. })
        ));
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], ProgressEvent::Error { .. }));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn closing_in_process_stream_cancels_the_run() {
        let root = TempDir::new().unwrap();
        let svc = service(&root, MockBackend::new(BackendKind::Cpu), "/nonexistent/worker");

        let (mut events, task) = svc.stream_in_process(&request());
        events.close();

        assert!(matches!(task.await.unwrap(), Err(SubflowError::Cancelled)));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn backend_report_lists_candidates() {
        let root = TempDir::new().unwrap();
        let svc = service(&root, MockBackend::new(BackendKind::Cpu), "true");
        assert_eq!(svc.backend_report(), vec![(BackendKind::Cpu, true)]);
        assert_eq!(svc.probe().unwrap().kind(), BackendKind::Cpu);
    }
}
