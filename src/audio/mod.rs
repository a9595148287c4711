//! Audio acquisition and slicing.

pub mod fetch;
pub mod wav;

pub use fetch::{AudioFetcher, CommandExecutor, SystemCommandExecutor, YtDlpFetcher};
pub use wav::{AudioAsset, ChunkSlicer, WavSlicer};
