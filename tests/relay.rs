#![cfg(all(feature = "cli", feature = "whisper"))]

//! Runs the real `subflow worker` under the relay, with stand-in downloaders.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use subflow::config::Config;
use subflow::defaults::DOWNLOAD_ERROR_MESSAGE;
use subflow::ipc::protocol::ProgressEvent;
use subflow::pipeline::types::TranscriptionRequest;
use subflow::service::TranscriptionService;
use subflow::stt::engine::ModelSize;
use subflow::{Pipeline, SubflowError};
use tempfile::TempDir;

fn worker_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_subflow"))
}

/// A downloader that never finishes.
fn stalling_downloader(dir: &Path) -> PathBuf {
    let path = dir.join("stall.sh");
    std::fs::write(&path, "#!/bin/sh\nsleep 60\n").unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn service(root: &TempDir, downloader: &Path, timeout_secs: u64) -> TranscriptionService {
    let mut config = Config::default();
    config.engine.backend = Some("cpu".to_string());
    config.pipeline.workspace_root = root.path().join("work");
    config.pipeline.timeout_secs = timeout_secs;
    config.pipeline.kill_grace_ms = 500;
    config.downloader.program = downloader.to_string_lossy().into_owned();
    let pipeline = Pipeline::from_config(&config);
    TranscriptionService::with_pipeline(config, pipeline, worker_binary())
}

fn request() -> TranscriptionRequest {
    TranscriptionRequest::new("https://example.invalid/watch?v=1", ModelSize::Tiny)
}

fn workspace_count(root: &TempDir) -> usize {
    std::fs::read_dir(root.path().join("work"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn download_failure_ends_with_user_facing_error() {
    let root = TempDir::new().unwrap();
    let svc = service(&root, Path::new("false"), 60);

    let mut handle = svc.stream(&request()).unwrap();
    let mut events = Vec::new();
    while let Some(event) = handle.next().await {
        events.push(event);
    }
    let stats = handle.finish().await;

    assert!(matches!(events.first(), Some(ProgressEvent::Status { .. })));
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Error {
            message: DOWNLOAD_ERROR_MESSAGE.to_string()
        })
    );
    assert_eq!(stats.exit_code, Some(1));
    assert_eq!(workspace_count(&root), 0);
}

#[tokio::test]
async fn synchronous_variant_maps_download_error() {
    let root = TempDir::new().unwrap();
    let svc = service(&root, Path::new("false"), 60);

    let result = svc.transcribe(&request()).await;
    assert!(matches!(
        result,
        Err(SubflowError::Download { ref message }) if message == DOWNLOAD_ERROR_MESSAGE
    ));
}

#[tokio::test]
async fn timeout_kills_worker_and_removes_workspace() {
    let root = TempDir::new().unwrap();
    let downloader = stalling_downloader(root.path());
    let svc = service(&root, &downloader, 1);

    let started = Instant::now();
    let result = svc.transcribe(&request()).await;

    assert!(matches!(result, Err(SubflowError::Timeout { secs: 1 })));
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(workspace_count(&root), 0);
}

#[tokio::test]
async fn client_disconnect_terminates_worker() {
    let root = TempDir::new().unwrap();
    let downloader = stalling_downloader(root.path());
    let svc = service(&root, &downloader, 120);

    let mut handle = svc.stream(&request()).unwrap();
    // Wait until the worker is inside the download
    loop {
        match handle.next().await {
            Some(ProgressEvent::Progress { .. }) => break,
            Some(_) => continue,
            None => panic!("worker ended early"),
        }
    }
    assert_eq!(workspace_count(&root), 1);

    drop(handle);

    let deadline = Instant::now() + Duration::from_secs(10);
    while workspace_count(&root) > 0 {
        assert!(
            Instant::now() < deadline,
            "workspace still present after disconnect"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
