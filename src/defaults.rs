//! Default configuration constants for subflow.
//!
//! Shared between the config file, the CLI and the worker so the supervising
//! process and the worker agree on every default.

/// Sample rate requested from the downloader's audio post-processing.
///
/// 16kHz mono is what Whisper consumes natively.
pub const SAMPLE_RATE: u32 = 16000;

/// Default chunk length in seconds.
pub const CHUNK_DURATION_SECS: f64 = 30.0;

/// Hard wall-clock limit for a single request, in seconds.
pub const TIMEOUT_SECS: u64 = 300;

/// Time a worker gets between SIGTERM and SIGKILL, in milliseconds.
pub const KILL_GRACE_MS: u64 = 2000;

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Default downloader executable.
pub const DOWNLOADER_PROGRAM: &str = "yt-dlp";

/// Prefix of every per-request workspace directory.
pub const WORKSPACE_PREFIX: &str = "run-";

/// Capacity of the relay's event channel.
///
/// Small on purpose: the relay forwards one event at a time and a full
/// channel means the consumer is not keeping up.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Message used when the downloader fails.
pub const DOWNLOAD_ERROR_MESSAGE: &str =
    "Error downloading the video. Please check if the URL is correct and public.";

/// Message used when a run yields no processable chunk.
pub const NO_PROCESSABLE_AUDIO: &str = "no processable audio";

// Progress phases (percent).
pub const PROGRESS_DOWNLOAD: f32 = 0.0;
pub const PROGRESS_PLANNING: f32 = 10.0;
pub const PROGRESS_LOADING_MODEL: f32 = 15.0;
pub const PROGRESS_CHUNKS_START: f32 = 20.0;
pub const PROGRESS_CHUNKS_SPAN: f32 = 70.0;
pub const PROGRESS_FINALIZING: f32 = 90.0;
pub const PROGRESS_DONE: f32 = 100.0;

/// Report the GPU backend compiled into this build.
///
/// Returns `None` for CPU-only builds.
pub fn gpu_backend() -> Option<&'static str> {
    if cfg!(feature = "cuda") {
        Some("CUDA")
    } else if cfg!(feature = "vulkan") {
        Some("Vulkan")
    } else if cfg!(feature = "hipblas") {
        Some("HipBLAS (AMD)")
    } else if cfg!(feature = "metal") {
        Some("Metal")
    } else {
        None
    }
}
