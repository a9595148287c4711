#![cfg(feature = "whisper")]

//! Runs the real Whisper backends when a model is installed; skips otherwise.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use subflow::audio::fetch::AudioFetcher;
use subflow::audio::wav::{AudioAsset, WavSlicer};
use subflow::config::{Config, EngineConfig};
use subflow::defaults::gpu_backend;
use subflow::ipc::protocol::ProgressEvent;
use subflow::pipeline::runner::{Pipeline, RunWorkspace};
use subflow::pipeline::sink::CollectorSink;
use subflow::pipeline::types::TranscriptionRequest;
use subflow::stt::engine::{Backend, LoadedModel, ModelSize};
use subflow::stt::whisper::{WhisperBackend, WhisperConfig, model_installed};
use subflow::workspace::ResourceArena;
use tempfile::TempDir;

fn engine_config() -> EngineConfig {
    let mut engine = Config::default()
        .with_env_overrides()
        .map(|c| c.engine)
        .unwrap_or_default();
    engine.threads = Some(4);
    engine
}

/// Smallest installed model, if any.
fn find_model(engine: &EngineConfig) -> Option<ModelSize> {
    let found = ModelSize::ALL
        .iter()
        .copied()
        .find(|size| model_installed(&engine.models_dir, *size));
    if found.is_none() {
        eprintln!(
            "No Whisper model in {}; skipping backend tests. \
             Download ggml-tiny.bin there to run them.",
            engine.models_dir.display()
        );
    }
    found
}

fn write_silence(path: &Path, seconds: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    for _ in 0..seconds * 16000 {
        writer.write_sample(0i16).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}

fn transcribe_silence(backend: &WhisperBackend, size: ModelSize, label: &str) {
    let dir = TempDir::new().unwrap();
    let audio = dir.path().join("silence.wav");
    write_silence(&audio, 1);

    let mut model = match backend.load(size) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("[{label}] Failed to load model: {e}; skipping");
            return;
        }
    };
    eprintln!("[{label}] Model: {}", model.model_name());

    let segments = model
        .transcribe(&audio)
        .expect("silence transcription failed");
    let text: String = segments.iter().map(|s| s.text.as_str()).collect();
    eprintln!("[{label}] Silence result: \"{text}\"");

    // Silence should produce empty or very short output
    assert!(
        text.len() < 50,
        "Expected short/empty text for silence, got {} chars: {}",
        text.len(),
        text
    );
    for segment in &segments {
        assert!(segment.local_start <= segment.local_end);
    }
}

#[test]
fn test_cpu_transcribes_silence() {
    let engine = engine_config();
    let Some(size) = find_model(&engine) else {
        return;
    };
    let backend = WhisperBackend::cpu(WhisperConfig::from(&engine));
    assert!(backend.is_usable());
    transcribe_silence(&backend, size, "CPU");
}

#[test]
fn test_accelerated_transcribes_silence() {
    let engine = engine_config();
    let Some(size) = find_model(&engine) else {
        return;
    };
    let backend = WhisperBackend::accelerated(WhisperConfig::from(&engine));
    if !backend.is_usable() {
        eprintln!("No GPU support compiled in; skipping");
        return;
    }
    let label = gpu_backend().unwrap_or("GPU");
    transcribe_silence(&backend, size, label);
}

/// Hands out a prepared local WAV instead of downloading.
struct LocalFile(PathBuf);

impl AudioFetcher for LocalFile {
    fn fetch(&self, _url: &str, arena: &ResourceArena) -> subflow::Result<AudioAsset> {
        let dest = arena.path_for("audio.wav")?;
        std::fs::copy(&self.0, &dest)?;
        AudioAsset::probe(&dest)
    }
}

#[test]
fn test_pipeline_runs_real_model_over_chunks() {
    let engine = engine_config();
    let Some(size) = find_model(&engine) else {
        return;
    };

    let source_dir = TempDir::new().unwrap();
    let source = source_dir.path().join("source.wav");
    write_silence(&source, 25);

    let backends: Vec<Arc<dyn Backend>> =
        vec![Arc::new(WhisperBackend::cpu(WhisperConfig::from(&engine)))];
    let pipeline = Pipeline::new(backends, Arc::new(LocalFile(source)), Arc::new(WavSlicer));

    let root = TempDir::new().unwrap();
    let request = TranscriptionRequest::new("file://silence", size).with_chunk_duration(10.0);
    let mut sink = CollectorSink::new();
    let summary = pipeline
        .run(&request, &RunWorkspace::Fresh(root.path().to_path_buf()), &mut sink)
        .expect("pipeline run failed");

    assert_eq!(summary.total_chunks, 3);
    assert!(matches!(
        sink.events().last(),
        Some(ProgressEvent::Completed { .. })
    ));
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}
