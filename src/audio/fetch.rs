//! Audio download through an external media downloader.
//!
//! The `CommandExecutor` trait keeps the downloader invocation testable
//! without network access or yt-dlp installed.

use crate::audio::wav::AudioAsset;
use crate::config::DownloaderConfig;
use crate::defaults::{DOWNLOAD_ERROR_MESSAGE, SAMPLE_RATE};
use crate::error::{Result, SubflowError};
use crate::workspace::ResourceArena;
use std::process::Command;

/// Trait for executing system commands.
pub trait CommandExecutor: Send + Sync {
    /// Execute a command with arguments, returning its stdout.
    fn execute(&self, command: &str, args: &[String]) -> Result<String>;
}

/// Production command executor using std::process::Command.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn execute(&self, command: &str, args: &[String]) -> Result<String> {
        let output = Command::new(command).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SubflowError::Download {
                    message: format!("{} not found. Install it and make sure it is on PATH", command),
                }
            } else {
                SubflowError::Download {
                    message: format!("Failed to execute {}: {}", command, e),
                }
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubflowError::Download {
                message: format!(
                    "{} failed with status {:?}: {}",
                    command,
                    output.status.code(),
                    stderr.trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Produces a local audio file for a URL inside a workspace.
pub trait AudioFetcher: Send + Sync {
    fn fetch(&self, url: &str, arena: &ResourceArena) -> Result<AudioAsset>;
}

/// Downloads the best audio stream with yt-dlp and converts it to 16kHz mono WAV.
pub struct YtDlpFetcher<E: CommandExecutor> {
    executor: E,
    config: DownloaderConfig,
}

impl YtDlpFetcher<SystemCommandExecutor> {
    pub fn system(config: DownloaderConfig) -> Self {
        Self::new(SystemCommandExecutor, config)
    }
}

impl<E: CommandExecutor> YtDlpFetcher<E> {
    pub fn new(executor: E, config: DownloaderConfig) -> Self {
        Self { executor, config }
    }

    fn args(&self, url: &str, output_template: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "--format",
            "bestaudio/best",
            "--no-playlist",
            "--quiet",
            "--no-warnings",
            "--extract-audio",
            "--audio-format",
            "wav",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push("--postprocessor-args".to_string());
        args.push(format!("ffmpeg:-ac 1 -ar {}", SAMPLE_RATE));
        args.push("--output".to_string());
        args.push(output_template.to_string());
        args.extend(self.config.extra_args.iter().cloned());
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }
}

impl<E: CommandExecutor> AudioFetcher for YtDlpFetcher<E> {
    fn fetch(&self, url: &str, arena: &ResourceArena) -> Result<AudioAsset> {
        let final_path = arena.path_for("audio.wav")?;
        let template = arena.dir().join("audio.%(ext)s");
        let args = self.args(url, &template.to_string_lossy());

        tracing::info!(url, "Downloading audio");
        if let Err(e) = self.executor.execute(&self.config.program, &args) {
            tracing::error!(url, error = %e, "Download failed");
            return Err(SubflowError::Download {
                message: DOWNLOAD_ERROR_MESSAGE.to_string(),
            });
        }

        if !final_path.exists() {
            tracing::error!(path = %final_path.display(), "Downloader produced no WAV file");
            return Err(SubflowError::Download {
                message: format!("Expected audio file not found at {}", final_path.display()),
            });
        }

        let asset = AudioAsset::probe(&final_path)?;
        tracing::info!(
            path = %asset.path.display(),
            duration_secs = asset.duration_seconds,
            "Audio downloaded"
        );
        Ok(asset)
    }
}
