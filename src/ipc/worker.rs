//! The isolated transcription worker.
//!
//! A worker is a child process that runs exactly one request and writes its
//! progress as JSON lines on stdout. When it exits, everything the inference
//! engine allocated goes with it.

use crate::config::{Config, DownloaderConfig, EngineConfig};
use crate::pipeline::runner::{Pipeline, RunWorkspace};
use crate::pipeline::sink::JsonLinesSink;
use crate::pipeline::types::TranscriptionRequest;
use crate::stt::engine::ModelSize;
use std::io::Write;
use std::path::PathBuf;

/// Everything a worker needs, passed on its command line.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerArgs {
    pub url: String,
    pub model_size: ModelSize,
    pub chunk_duration: f64,
    /// Directory created and later removed by the supervising process
    pub workspace: PathBuf,
    pub backend: Option<String>,
    pub models_dir: PathBuf,
    pub language: String,
    pub threads: Option<usize>,
    pub downloader: String,
    pub downloader_args: Vec<String>,
}

impl WorkerArgs {
    pub fn new(request: &TranscriptionRequest, workspace: PathBuf, config: &Config) -> Self {
        Self {
            url: request.source_url.clone(),
            model_size: request.model_size,
            chunk_duration: request.chunk_duration,
            workspace,
            backend: config.engine.backend.clone(),
            models_dir: config.engine.models_dir.clone(),
            language: config.engine.language.clone(),
            threads: config.engine.threads,
            downloader: config.downloader.program.clone(),
            downloader_args: config.downloader.extra_args.clone(),
        }
    }

    /// Arguments for the hidden `worker` subcommand, subcommand name included.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "worker".to_string(),
            "--model-size".to_string(),
            self.model_size.to_string(),
            "--chunk-duration".to_string(),
            self.chunk_duration.to_string(),
            "--workspace".to_string(),
            self.workspace.to_string_lossy().into_owned(),
            "--models-dir".to_string(),
            self.models_dir.to_string_lossy().into_owned(),
            "--language".to_string(),
            self.language.clone(),
            "--downloader".to_string(),
            self.downloader.clone(),
        ];
        if let Some(backend) = &self.backend {
            args.push("--backend".to_string());
            args.push(backend.clone());
        }
        if let Some(threads) = self.threads {
            args.push("--threads".to_string());
            args.push(threads.to_string());
        }
        for extra in &self.downloader_args {
            // `=` form so values starting with '-' survive parsing
            args.push(format!("--downloader-arg={}", extra));
        }
        args.push("--".to_string());
        args.push(self.url.clone());
        args
    }

    pub fn request(&self) -> TranscriptionRequest {
        TranscriptionRequest::new(self.url.clone(), self.model_size)
            .with_chunk_duration(self.chunk_duration)
    }

    /// The subset of configuration a worker runs with.
    pub fn config(&self) -> Config {
        let mut config = Config {
            engine: EngineConfig {
                backend: self.backend.clone(),
                models_dir: self.models_dir.clone(),
                language: self.language.clone(),
                threads: self.threads,
            },
            downloader: DownloaderConfig {
                program: self.downloader.clone(),
                extra_args: self.downloader_args.clone(),
            },
            ..Config::default()
        };
        config.pipeline.chunk_duration_secs = self.chunk_duration;
        config
    }
}

/// Run a worker with the production pipeline. Returns the process exit code.
pub fn run_worker<W: Write + Send>(args: &WorkerArgs, out: W) -> i32 {
    let pipeline = Pipeline::from_config(&args.config());
    run_worker_with(&pipeline, args, out)
}

/// Run a worker with an explicit pipeline.
///
/// Exit code 0 after `completed`, 1 after `error`.
pub fn run_worker_with<W: Write + Send>(pipeline: &Pipeline, args: &WorkerArgs, out: W) -> i32 {
    let mut sink = JsonLinesSink::new(out);
    let workspace = RunWorkspace::Adopt(args.workspace.clone());
    match pipeline.run(&args.request(), &workspace, &mut sink) {
        Ok(summary) => {
            tracing::debug!(segments = summary.total_segments, "Worker finished");
            0
        }
        Err(e) => {
            tracing::debug!(error = %e, "Worker failed");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fetch::AudioFetcher;
    use crate::audio::wav::{AudioAsset, WavSlicer};
    use crate::error::{Result, SubflowError};
    use crate::ipc::protocol::{ProgressEvent, parse_line};
    use crate::stt::engine::{BackendKind, MockBackend};
    use crate::workspace::ResourceArena;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct UnreachableSource;

    impl AudioFetcher for UnreachableSource {
        fn fetch(&self, _url: &str, _arena: &ResourceArena) -> Result<AudioAsset> {
            Err(SubflowError::Download {
                message: "Error downloading the video.".to_string(),
            })
        }
    }

    fn args(workspace: PathBuf) -> WorkerArgs {
        WorkerArgs {
            url: "https://example.com/v".to_string(),
            model_size: ModelSize::Small,
            chunk_duration: 30.0,
            workspace,
            backend: Some("cpu".to_string()),
            models_dir: PathBuf::from("/models"),
            language: "en".to_string(),
            threads: Some(4),
            downloader: "yt-dlp".to_string(),
            downloader_args: vec!["--cookies-from-browser".to_string(), "firefox".to_string()],
        }
    }

    #[test]
    fn cli_args_put_url_after_separator() {
        let cli = args(PathBuf::from("/tmp/run-1")).to_cli_args();
        assert_eq!(cli[0], "worker");
        assert_eq!(cli[cli.len() - 2], "--");
        assert_eq!(cli[cli.len() - 1], "https://example.com/v");
        assert!(cli.contains(&"--downloader-arg=--cookies-from-browser".to_string()));
        assert!(cli.windows(2).any(|w| w[0] == "--backend" && w[1] == "cpu"));
        assert!(cli.windows(2).any(|w| w[0] == "--model-size" && w[1] == "small"));
    }

    #[test]
    fn config_carries_engine_and_downloader_settings() {
        let config = args(PathBuf::from("/tmp/run-1")).config();
        assert_eq!(config.engine.backend.as_deref(), Some("cpu"));
        assert_eq!(config.engine.threads, Some(4));
        assert_eq!(config.downloader.extra_args.len(), 2);
    }

    #[test]
    fn failed_run_writes_error_line_and_exits_nonzero() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(
            vec![Arc::new(MockBackend::new(BackendKind::Cpu))],
            Arc::new(UnreachableSource),
            Arc::new(WavSlicer),
        );

        let mut out = Vec::new();
        let code = run_worker_with(&pipeline, &args(dir.path().to_path_buf()), &mut out);
        assert_eq!(code, 1);

        let output = String::from_utf8(out).unwrap();
        let last = output.lines().filter_map(parse_line).last().unwrap();
        assert_eq!(
            last,
            ProgressEvent::Error {
                message: "Error downloading the video.".to_string()
            }
        );
        // The workspace belongs to the supervisor
        assert!(dir.path().exists());
    }

    #[test]
    fn missing_workspace_is_reported() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(
            vec![Arc::new(MockBackend::new(BackendKind::Cpu))],
            Arc::new(UnreachableSource),
            Arc::new(WavSlicer),
        );

        let mut out = Vec::new();
        let code = run_worker_with(&pipeline, &args(dir.path().join("gone")), &mut out);
        assert_eq!(code, 1);
        assert!(String::from_utf8(out).unwrap().contains("\"type\":\"error\""));
    }
}
