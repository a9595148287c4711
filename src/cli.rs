//! Command-line interface for subflow
//!
//! Provides argument parsing using clap derive macros.

use crate::ipc::worker::WorkerArgs;
use crate::stt::engine::ModelSize;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Subtitles for online videos, transcribed locally
#[derive(Parser, Debug)]
#[command(name = "subflow", version, about = "Generate SRT subtitles for online videos")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// Logging verbosity: -1 quiet, 0 normal, 1+ verbose.
    pub fn verbosity(&self) -> i8 {
        if self.quiet {
            -1
        } else {
            i8::try_from(self.verbose).unwrap_or(i8::MAX)
        }
    }
}

/// Parse a duration into seconds.
///
/// Accepts bare numbers (seconds, fractions allowed) and anything
/// `humantime` understands: `30s`, `5m`, `1h30m`, `1500ms`.
fn parse_seconds(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs_f64())
        .map_err(|e| e.to_string())
}

/// Parse a timeout into whole seconds, rejecting zero.
fn parse_timeout_secs(s: &str) -> Result<u64, String> {
    let secs = parse_seconds(s)?;
    if !secs.is_finite() || secs < 1.0 {
        return Err("timeout must be at least one second".to_string());
    }
    Ok(secs as u64)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe a video URL into SRT subtitles
    Transcribe(TranscribeArgs),

    /// Show inference backends and which one would be used
    Backends,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run one transcription and print JSON events (used internally)
    #[command(hide = true)]
    Worker(WorkerCli),
}

#[derive(Args, Debug)]
pub struct TranscribeArgs {
    /// Video or audio URL
    pub url: String,

    /// Whisper model size: tiny, base, small, medium, large
    #[arg(long, short = 'm', value_name = "SIZE")]
    pub model_size: Option<ModelSize>,

    /// Chunk length. Examples: 30, 30s, 1m
    #[arg(long, value_name = "DURATION", value_parser = parse_seconds)]
    pub chunk_duration: Option<f64>,

    /// Wall-clock limit for the whole run. Examples: 300, 5m
    #[arg(long, value_name = "DURATION", value_parser = parse_timeout_secs)]
    pub timeout: Option<u64>,

    /// Inference backend override (accelerated, cpu)
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Print progress events as JSON lines instead of the final subtitles
    #[arg(long)]
    pub stream: bool,

    /// Run in this process instead of an isolated worker
    #[arg(long)]
    pub in_process: bool,

    /// Write subtitles to a file (default name: transcription.srt)
    #[arg(
        long,
        short = 'o',
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "transcription.srt"
    )]
    pub output: Option<PathBuf>,
}

/// Configuration actions
#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

/// Arguments of the hidden worker subcommand.
#[derive(Args, Debug)]
pub struct WorkerCli {
    #[arg(long)]
    pub model_size: ModelSize,

    #[arg(long)]
    pub chunk_duration: f64,

    #[arg(long)]
    pub workspace: PathBuf,

    #[arg(long)]
    pub models_dir: PathBuf,

    #[arg(long)]
    pub language: String,

    #[arg(long)]
    pub downloader: String,

    #[arg(long)]
    pub backend: Option<String>,

    #[arg(long)]
    pub threads: Option<usize>,

    #[arg(long = "downloader-arg", allow_hyphen_values = true)]
    pub downloader_args: Vec<String>,

    #[arg(last = true)]
    pub url: String,
}

impl From<WorkerCli> for WorkerArgs {
    fn from(cli: WorkerCli) -> Self {
        Self {
            url: cli.url,
            model_size: cli.model_size,
            chunk_duration: cli.chunk_duration,
            workspace: cli.workspace,
            backend: cli.backend,
            models_dir: cli.models_dir,
            language: cli.language,
            threads: cli.threads,
            downloader: cli.downloader,
            downloader_args: cli.downloader_args,
        }
    }
}
